mod vm_lower;
