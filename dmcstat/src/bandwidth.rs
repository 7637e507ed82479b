use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use log::info;
use pmu::{Counter, EventDescriptor, Scope};

// DMC-620 clkdiv2 event 0x12 counts bus accesses; each access moves one
// cache line.
const DMC620_CNT_BUS_ACCESS: u64 = 0x12;
const CACHE_LINE_BYTES: u64 = 64;

struct DeviceCounters {
    name: String,
    type_id: u32,
    reads: Counter,
    writes: Counter,
}

/// One-shot memory traffic measurement across every matching memory
/// controller: a read and a write bus-access counter per controller, a
/// blocking interval, then per-device counts and a derived byte total.
pub fn do_bandwidth(prefix: &str, seconds: u64, cpu: i32) -> anyhow::Result<()> {
    let found = pmu::enumerate_sources(prefix)
        .with_context(|| format!("discovering event sources matching '{prefix}*'"))?;
    if found.sources.is_empty() {
        bail!("no event sources matching '{prefix}*' were found");
    }

    let scope = Scope::system_wide(cpu);
    let mut devices = Vec::with_capacity(found.sources.len());
    for src in &found.sources {
        // match = 0 selects read accesses, match = 1 selects writes.
        let read_desc =
            EventDescriptor::dmc620(src.type_id, DMC620_CNT_BUS_ACCESS, 0x1, 0x1, 0x0)?;
        let write_desc =
            EventDescriptor::dmc620(src.type_id, DMC620_CNT_BUS_ACCESS, 0x1, 0x1, 0x1)?;
        devices.push(DeviceCounters {
            name: src.name.clone(),
            type_id: src.type_id,
            reads: Counter::open(&read_desc, scope)
                .with_context(|| format!("opening read counter on {}", src.name))?,
            writes: Counter::open(&write_desc, scope)
                .with_context(|| format!("opening write counter on {}", src.name))?,
        });
    }
    info!(
        "opened {} counters on {} devices",
        devices.len() * 2,
        devices.len()
    );

    for dev in &mut devices {
        dev.reads.reset()?;
        dev.writes.reset()?;
    }
    for dev in &mut devices {
        dev.reads.enable()?;
        dev.writes.enable()?;
    }

    info!("measuring for {seconds} s");
    thread::sleep(Duration::from_secs(seconds));

    for dev in &mut devices {
        dev.reads.disable()?;
        dev.writes.disable()?;
    }

    let mut total_accesses = 0u64;
    for dev in &mut devices {
        let reads = dev.reads.read()?;
        let writes = dev.writes.read()?;
        total_accesses += reads + writes;
        println!(
            "Device: {}, Type: {}, Read Count: {reads}, Write Count: {writes}",
            dev.name, dev.type_id
        );
    }
    println!("Total data: {} Byte", total_bytes(total_accesses));

    Ok(())
}

fn total_bytes(accesses: u64) -> u64 {
    accesses * CACHE_LINE_BYTES
}
