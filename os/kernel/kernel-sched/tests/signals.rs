mod common;

use common::{enter, program, space, va, with_kernel};
use kernel_info::memory::SIGNAL_STACK_BASE;
use kernel_info::thread::{NSIG, SIGKILL};
use kernel_memory_addresses::PAGE_SIZE;
use kernel_sched::signal::SIGRETURN_TRAMPOLINE;
use kernel_sched::{SchedError, SignalAction, ThreadId, TrapFrame};

fn user_frame() -> TrapFrame {
    let mut tf = TrapFrame::zeroed();
    tf.x[0] = 5;
    tf.x[30] = 0x88;
    tf.elr = 0x1234;
    tf.sp_el0 = 0xFFFF_FFFF_E000;
    tf
}

#[test]
fn a_second_signal_overwrites_the_first() {
    with_kernel(|sched, env| {
        let id = enter(sched, env, &program(16));
        sched.send_signal(id, 2).unwrap();
        sched.send_signal(id, 3).unwrap();
        assert_eq!(sched.current().unwrap().pending_signal(), Some(3));

        assert_eq!(sched.send_signal(id, NSIG as u64).unwrap_err(), SchedError::BadSignal(10));
        let ghost = ThreadId::new(42);
        assert_eq!(sched.send_signal(ghost, 1).unwrap_err(), SchedError::ThreadNotFound(ghost));
    });
}

#[test]
fn handler_runs_on_the_signal_stack_and_sigreturn_restores() {
    with_kernel(|sched, env| {
        let id = enter(sched, env, &program(16));
        sched.register_signal(3, va(0x400)).unwrap();
        sched.send_signal(id, 3).unwrap();
        let free = env.alloc.free_pages();

        let original = user_frame();
        let mut tf = original;
        assert_eq!(
            sched.deliver_signal(env, &mut tf).unwrap(),
            SignalAction::Handler {
                signum: 3,
                handler: va(0x400)
            }
        );
        assert_eq!(tf.x[0], 3);
        assert_eq!(tf.x[30], SIGNAL_STACK_BASE);
        assert_eq!(tf.elr, 0x400);
        assert_eq!(tf.sp_el0, SIGNAL_STACK_BASE + PAGE_SIZE);
        assert!(sched.current().unwrap().in_signal_handler());
        assert_eq!(sched.current().unwrap().pending_signal(), None);

        let mut code = [0; 8];
        sched.copy_from_user(env.mapper, va(SIGNAL_STACK_BASE), &mut code).unwrap();
        assert_eq!(code[..4], SIGRETURN_TRAMPOLINE[0].to_le_bytes());
        assert_eq!(code[4..], SIGRETURN_TRAMPOLINE[1].to_le_bytes());
        let leaf = space(sched, env.mapper).leaf(va(SIGNAL_STACK_BASE)).unwrap();
        assert!(leaf.user() && !leaf.read_only() && !leaf.uxn());

        // Nothing nests while the handler runs.
        sched.send_signal(id, 4).unwrap();
        let mut again = tf;
        assert_eq!(sched.deliver_signal(env, &mut again).unwrap(), SignalAction::None);
        assert_eq!(again, tf);

        sched.sigreturn(env, &mut tf).unwrap();
        assert_eq!(tf, original);
        assert!(space(sched, env.mapper).leaf(va(SIGNAL_STACK_BASE)).is_none());
        assert_eq!(env.alloc.free_pages(), free);
        assert_eq!(sched.sigreturn(env, &mut tf).unwrap_err(), SchedError::NotInSignalHandler);

        // Signal 4 was kept and has no handler.
        assert_eq!(sched.deliver_signal(env, &mut tf).unwrap(), SignalAction::Terminate(4));
        assert_eq!(sched.deliver_signal(env, &mut tf).unwrap(), SignalAction::None);
    });
}

#[test]
fn unhandled_and_reset_signals_terminate() {
    with_kernel(|sched, env| {
        let id = enter(sched, env, &program(16));
        sched.register_signal(SIGKILL as u64, va(0x500)).unwrap();
        sched.register_signal(SIGKILL as u64, va(0)).unwrap();
        assert_eq!(sched.current().unwrap().signal_handler(SIGKILL), None);
        assert_eq!(
            sched.register_signal(NSIG as u64, va(0x500)).unwrap_err(),
            SchedError::BadSignal(NSIG as u64)
        );

        sched.send_signal(id, SIGKILL as u64).unwrap();
        let mut tf = user_frame();
        assert_eq!(
            sched.deliver_signal(env, &mut tf).unwrap(),
            SignalAction::Terminate(SIGKILL as u64)
        );
        assert_eq!(tf, user_frame());
    });
}

#[test]
fn exiting_inside_a_handler_frees_the_signal_stack() {
    with_kernel(|sched, env| {
        let free = env.alloc.free_pages();
        let id = enter(sched, env, &program(16));
        sched.register_signal(1, va(0x400)).unwrap();
        sched.send_signal(id, 1).unwrap();
        let mut tf = user_frame();
        sched.deliver_signal(env, &mut tf).unwrap();

        sched.retire_current(env, 0).unwrap();
        sched.schedule(env).unwrap();
        assert_eq!(sched.reap_zombies(env), 1);
        assert_eq!(env.alloc.free_pages(), free);
    });
}
