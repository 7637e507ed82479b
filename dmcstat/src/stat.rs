use anyhow::Context;
use log::info;
use pmu::{EventDescriptor, GroupSession, HardwareEvent, Scope};

/// Counts a group of CPU events over a built-in workload: cycles lead the
/// group, everything is reset and enabled through the leader, and a single
/// grouped read at the end yields every counter at once.
pub fn do_stat(loops: u64, raw_codes: &[u64]) -> anyhow::Result<()> {
    let leader = EventDescriptor::hardware(HardwareEvent::Cycles, true).exclude_privileged();
    let mut members = vec![
        EventDescriptor::hardware(HardwareEvent::Instructions, false).exclude_privileged(),
        EventDescriptor::hardware(HardwareEvent::StalledCyclesFrontend, false)
            .exclude_privileged(),
        EventDescriptor::hardware(HardwareEvent::StalledCyclesBackend, false)
            .exclude_privileged(),
    ];
    for &code in raw_codes {
        members.push(EventDescriptor::raw(code, false).exclude_privileged());
    }

    let mut labels = vec![leader.label().to_string()];
    labels.extend(members.iter().map(|m| m.label().to_string()));

    let mut session = GroupSession::open(&leader, &members, Scope::calling_process())
        .context("opening counter group")?;
    info!("opened a group of {} counters", session.len());

    session.reset()?;
    session.enable()?;
    workload(loops);
    session.disable()?;

    let values = session.read()?;
    for (label, value) in labels.iter().zip(&values) {
        println!("{label}: {value}");
    }

    Ok(())
}

// The measured workload: a serial add loop long enough for the counts to
// dwarf session overhead.
fn workload(loops: u64) {
    let mut sum = 0u64;
    for i in 0..loops {
        sum = std::hint::black_box(sum + (i & 1));
    }
    std::hint::black_box(sum);
}
