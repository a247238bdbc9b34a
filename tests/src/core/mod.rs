mod codec;
mod interp;
