//! # Boot
//!
//! The firmware (or QEMU's `-kernel`) jumps to [`_start`] at
//! [`KERNEL_LOAD`](kernel_info::memory::KERNEL_LOAD) on every core, at EL2 or
//! EL1, with the MMU off and `x0` holding the device tree. Only core 0 goes
//! on; the others park in `wfe` forever.
//!
//! ## Boot tables
//!
//! Three statically reserved pages map the first 2 GiB of physical memory
//! twice: identity through `TTBR0_EL1` so the instruction after the MMU
//! switch still fetches, and at [`KERNEL_VIRTUAL_BASE`] through
//! `TTBR1_EL1`, which is the kernel's linear map from then on.
//!
//! ```text
//! __boot_pgd[0] ─► __boot_pud[0] ─► __boot_pmd[0..512]   2 MiB blocks
//!                                     < PERIPHERAL_BASE   normal, uncached
//!                                     ≥ PERIPHERAL_BASE   device nGnRnE
//!                  __boot_pud[1]  = 1 GiB device block    ARM local peripherals
//! ```
//!
//! User threads later replace `TTBR0_EL1`; `TTBR1_EL1` never changes.
//!
//! [`_start`]: self

use crate::{allocator, interrupts, mailbox, task, vfs};
use core::arch::{asm, global_asm};
use kernel_info::boot::{FixedRegion, SPIN_TABLES, STARTUP_REGION};
use kernel_info::memory::{KERNEL_VIRTUAL_BASE, LOCAL_PERIPHERAL_BASE, PERIPHERAL_BASE};
use kernel_uart::{CONSOLE, UartLogger, uart_trace};
use kernel_vmem::descriptor::{MAIR_IDX_DEVICE_NGNRNE, MAIR_IDX_NORMAL_NOCACHE, MAIR_VALUE};
use log::{LevelFilter, error, info};

/// 4 KiB granules, 48-bit virtual addresses in both halves.
const TCR_VALUE: u64 = 16 | (16 << 16) | (0b10 << 30);

const BLOCK: u64 = 0b01;
const TABLE: u64 = 0b11;
const ACCESS_FLAG: u64 = 1 << 10;
#[allow(clippy::cast_lossless)]
const NORMAL_BLOCK: u64 = ACCESS_FLAG | ((MAIR_IDX_NORMAL_NOCACHE as u64) << 2) | BLOCK;
#[allow(clippy::cast_lossless)]
const DEVICE_BLOCK: u64 = ACCESS_FLAG | ((MAIR_IDX_DEVICE_NGNRNE as u64) << 2) | BLOCK;

/// Stack of the boot flow, which later becomes thread 0.
const BOOT_STACK_SIZE: usize = 64 * 1024;

/// Flattened device tree header magic, big endian.
const FDT_MAGIC: u32 = 0xD00D_FEED;

static LOGGER: UartLogger = UartLogger::new(if cfg!(feature = "qemu") {
    LevelFilter::Debug
} else {
    LevelFilter::Info
});

global_asm!(
    r#"
.section .text.boot, "ax"
.global _start
_start:
    mrs     x1, mpidr_el1
    and     x1, x1, #3
    cbz     x1, 2f
1:  wfe
    b       1b

2:  mov     x19, x0

    mrs     x1, CurrentEL
    cmp     x1, #(2 << 2)
    b.ne    3f
    mov     x1, #(1 << 31)
    msr     hcr_el2, x1
    mov     x1, #3
    msr     cnthctl_el2, x1
    msr     cntvoff_el2, xzr
    mov     x1, #0x3c5
    msr     spsr_el2, x1
    adr     x1, 3f
    msr     elr_el2, x1
    eret

3:  mov     x1, #(3 << 20)
    msr     cpacr_el1, x1
    ldr     x1, ={tcr}
    msr     tcr_el1, x1
    ldr     x1, ={mair}
    msr     mair_el1, x1

    adrp    x1, __boot_pgd
    adrp    x2, __boot_pud
    adrp    x3, __boot_pmd
    orr     x4, x2, #{table}
    str     x4, [x1]
    orr     x4, x3, #{table}
    str     x4, [x2]
    ldr     x4, ={device}
    ldr     x5, ={local}
    orr     x4, x4, x5
    str     x4, [x2, #8]

    ldr     x7, ={peripheral}
    ldr     x8, ={normal}
    ldr     x9, ={device}
    mov     x6, #0
4:  lsl     x5, x6, #21
    cmp     x5, x7
    csel    x10, x9, x8, hs
    orr     x10, x10, x5
    str     x10, [x3, x6, lsl #3]
    add     x6, x6, #1
    cmp     x6, #512
    b.lo    4b

    msr     ttbr0_el1, x1
    msr     ttbr1_el1, x1
    dsb     ish
    isb
    mrs     x2, sctlr_el1
    orr     x2, x2, #1
    msr     sctlr_el1, x2
    isb

    ldr     x1, =__boot_stack_top
    mov     sp, x1
    ldr     x1, =__bss_start
    ldr     x2, =__bss_end
5:  cmp     x1, x2
    b.hs    6f
    str     xzr, [x1], #8
    b       5b

6:  ldr     x1, ={vectors}
    msr     vbar_el1, x1
    isb
    mov     x0, x19
    ldr     x1, ={main}
    br      x1

.section .data.boot_tables, "aw"
.balign 4096
.global __boot_pgd
__boot_pgd: .space 4096
__boot_pud: .space 4096
__boot_pmd: .space 4096

.section .bss.boot_stack, "aw", %nobits
.balign 16
__boot_stack: .space {stack}
__boot_stack_top:
"#,
    tcr = const TCR_VALUE,
    mair = const MAIR_VALUE,
    table = const TABLE,
    normal = const NORMAL_BLOCK,
    device = const DEVICE_BLOCK,
    peripheral = const PERIPHERAL_BASE,
    local = const LOCAL_PERIPHERAL_BASE,
    stack = const BOOT_STACK_SIZE,
    vectors = sym interrupts::exception_vectors,
    main = sym kernel_main,
);

unsafe extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
    static __boot_pgd: u8;
}

/// First Rust code; runs on the boot stack in the upper half.
extern "C" fn kernel_main(dtb: u64) -> ! {
    CONSOLE.init();
    if LOGGER.init().is_err() {
        uart_trace!("logger already installed\n");
    }

    let kernel = kernel_image();
    info!(
        "kernel image {:#x}..{:#x}, device tree at {dtb:#x}",
        kernel.start, kernel.end
    );

    let initramfs = vfs::init();
    let reserved = [
        Some(SPIN_TABLES),
        Some(kernel),
        Some(STARTUP_REGION),
        initramfs,
        device_tree(dtb),
    ];
    if let Err(e) = allocator::init(reserved.iter().flatten()) {
        error!("memory bring-up failed: {e}");
        halt();
    }

    mailbox::log_board_revision();
    task::init();
    task::spawn_init();
    interrupts::timer::init();
    task::idle()
}

/// The loaded image, physical.
fn kernel_image() -> FixedRegion {
    let start = (&raw const __kernel_start).addr() as u64 - KERNEL_VIRTUAL_BASE;
    let end = (&raw const __kernel_end).addr() as u64 - KERNEL_VIRTUAL_BASE;
    FixedRegion {
        name: "kernel image",
        start,
        end,
    }
}

/// The device tree blob, if `dtb` points at one.
#[allow(clippy::cast_possible_truncation)]
fn device_tree(dtb: u64) -> Option<FixedRegion> {
    if dtb == 0 {
        return None;
    }
    let header = core::ptr::with_exposed_provenance::<u32>((dtb + KERNEL_VIRTUAL_BASE) as usize);
    // Safety: the boot tables map all of low memory.
    let (magic, size) = unsafe {
        (
            u32::from_be(header.read_volatile()),
            u32::from_be(header.add(1).read_volatile()),
        )
    };
    (magic == FDT_MAGIC).then(|| FixedRegion {
        name: "device tree",
        start: dtb,
        end: dtb + u64::from(size),
    })
}

/// Physical address of the boot translation tables, for `TTBR0_EL1` while
/// a kernel-only thread runs.
pub fn boot_tables() -> u64 {
    (&raw const __boot_pgd).addr() as u64 - KERNEL_VIRTUAL_BASE
}

/// Park this core.
pub fn halt() -> ! {
    loop {
        unsafe { asm!("wfe", options(nomem, nostack)) };
    }
}
