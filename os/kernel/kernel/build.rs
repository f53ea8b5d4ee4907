use kernel_info::memory;
use std::{env, path::PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=kernel.ld");

    // Host builds only compile the unit tests.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("set by cargo"));
    let ld = manifest_dir.join("kernel.ld");

    // Sanity checks (fail fast during build)
    let virtual_base = memory::KERNEL_VIRTUAL_BASE;
    let load = memory::KERNEL_LOAD;
    assert_eq!(
        virtual_base & ((1u64 << 30) - 1),
        0,
        "KERNEL_VIRTUAL_BASE must be 1 GiB aligned (got {virtual_base:#x})"
    );
    assert_eq!(
        load & 0xfff,
        0,
        "KERNEL_LOAD must be 4 KiB aligned (got {load:#x})"
    );
    assert!(
        load < memory::INITRAMFS_BASE,
        "the kernel image must load below the initramfs (got {load:#x})"
    );

    println!("cargo:rustc-link-arg-bins=-T{}", ld.display());
    println!("cargo:rustc-link-arg-bins=--defsym=KERNEL_VIRTUAL_BASE={virtual_base:#x}");
    println!("cargo:rustc-link-arg-bins=--defsym=KERNEL_LOAD={load:#x}");
}
