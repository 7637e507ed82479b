use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use log::info;
use pmu::{EventDescriptor, GroupSession, HardwareEvent, Scope};

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

/// Reads and prints the instruction/cycle group once per period until
/// SIGINT flips the cancellation flag; the group is disabled and closed on
/// the way out instead of dying mid-measurement.
pub fn do_poll(period: Duration) -> anyhow::Result<()> {
    let leader =
        EventDescriptor::hardware(HardwareEvent::Instructions, true).exclude_privileged();
    let members = [EventDescriptor::hardware(HardwareEvent::Cycles, false).exclude_privileged()];

    let mut session = GroupSession::open(&leader, &members, Scope::calling_process())
        .context("opening counter group")?;

    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
    }

    session.reset()?;
    session.enable()?;
    info!("polling every {period:?}, stop with Ctrl-C");

    while !STOP.load(Ordering::Relaxed) {
        let values = session.read()?;
        println!("instructions={}, cycles={}", values[0], values[1]);
        thread::sleep(period);
    }

    session.disable()?;
    info!("interrupted, counters disabled");

    Ok(())
}
