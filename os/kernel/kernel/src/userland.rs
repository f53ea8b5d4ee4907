//! # Built-in Demo Program
//!
//! Runs as the first user thread when the initramfs has no `init`. It is
//! position independent and expects to be loaded at address zero:
//!
//! ```text
//! getpid ─► uart_write("hello from user space\n")
//!        ─► fork ─┬─ parent: uart_write("parent exits\n"), exit(0)
//!                 └─ child:  uart_write("child exits\n"),  exit(0)
//! ```

use core::arch::global_asm;

global_asm!(
    r#"
.section .rodata.userland, "a"
.balign 16
__userland_demo_start:
    mov     x8, #0
    svc     #0
    mov     x19, x0

    adr     x0, 10f
    mov     x1, #(11f - 10f)
    mov     x8, #2
    svc     #0

    mov     x8, #4
    svc     #0
    cbz     x0, 1f

    adr     x0, 12f
    mov     x1, #(13f - 12f)
    b       2f
1:  adr     x0, 14f
    mov     x1, #(15f - 14f)
2:  mov     x8, #2
    svc     #0

    mov     x0, #0
    mov     x8, #5
    svc     #0
3:  b       3b

10: .ascii "hello from user space\n"
11:
12: .ascii "parent exits\n"
13:
14: .ascii "child exits\n"
15:
.balign 4
__userland_demo_end:
"#
);

unsafe extern "C" {
    static __userland_demo_start: u8;
    static __userland_demo_end: u8;
}

/// The program image.
pub fn demo() -> &'static [u8] {
    let start = &raw const __userland_demo_start;
    let end = &raw const __userland_demo_end;
    // Safety: both labels delimit one read-only blob in the kernel image.
    unsafe { core::slice::from_raw_parts(start, end.addr() - start.addr()) }
}
