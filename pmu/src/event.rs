use perf_event_open_sys::bindings;

use crate::{Error, Result};

// DMC-620 PMU register layout (Arm DMC-620 TRM):
//   config   mask   bits 0-43
//   config1  match  bits 0-43
//   config2  invert bit 0, incr bits 1-2, event bits 3-8, clkdiv2 bit 9
pub(crate) const DMC620_MASK_BITS: u32 = 44;
pub(crate) const DMC620_MATCH_BITS: u32 = 44;
pub(crate) const DMC620_EVENT_BITS: u32 = 6;
pub(crate) const DMC620_CLKDIV2_BITS: u32 = 1;
const DMC620_EVENT_SHIFT: u32 = 3;
const DMC620_CLKDIV2_SHIFT: u32 = 9;

/// Portable hardware events every CPU PMU backend of the kernel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    Cycles,
    Instructions,
    LLCReferences,
    LLCMisses,
    BranchInstructions,
    BranchMisses,
    StalledCyclesFrontend,
    StalledCyclesBackend,
}

impl HardwareEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HardwareEvent::Cycles => "cycles",
            HardwareEvent::Instructions => "instructions",
            HardwareEvent::LLCReferences => "llc_references",
            HardwareEvent::LLCMisses => "llc_misses",
            HardwareEvent::BranchInstructions => "branches",
            HardwareEvent::BranchMisses => "branch_misses",
            HardwareEvent::StalledCyclesFrontend => "stalled_cycles_frontend",
            HardwareEvent::StalledCyclesBackend => "stalled_cycles_backend",
        }
    }

    fn code(&self) -> u64 {
        match self {
            HardwareEvent::Cycles => bindings::PERF_COUNT_HW_CPU_CYCLES as u64,
            HardwareEvent::Instructions => bindings::PERF_COUNT_HW_INSTRUCTIONS as u64,
            HardwareEvent::LLCReferences => bindings::PERF_COUNT_HW_CACHE_REFERENCES as u64,
            HardwareEvent::LLCMisses => bindings::PERF_COUNT_HW_CACHE_MISSES as u64,
            HardwareEvent::BranchInstructions => {
                bindings::PERF_COUNT_HW_BRANCH_INSTRUCTIONS as u64
            }
            HardwareEvent::BranchMisses => bindings::PERF_COUNT_HW_BRANCH_MISSES as u64,
            HardwareEvent::StalledCyclesFrontend => {
                bindings::PERF_COUNT_HW_STALLED_CYCLES_FRONTEND as u64
            }
            HardwareEvent::StalledCyclesBackend => {
                bindings::PERF_COUNT_HW_STALLED_CYCLES_BACKEND as u64
            }
        }
    }
}

/// A fully populated counter configuration, ready to submit to the kernel.
///
/// Building a descriptor never performs I/O; a descriptor is immutable once
/// handed to [`crate::Counter::open`] or [`crate::GroupSession::open`].
#[derive(Debug, Clone)]
pub struct EventDescriptor {
    pub(crate) source_type: u32,
    pub(crate) config: u64,
    pub(crate) config1: u64,
    pub(crate) config2: u64,
    pub(crate) leader: bool,
    pub(crate) read_group: bool,
    pub(crate) exclude_kernel: bool,
    pub(crate) exclude_hv: bool,
    pub(crate) inherit: bool,
    label: String,
}

impl EventDescriptor {
    /// A generalized hardware event. Leaders are opened with the grouped
    /// read format so one read returns every member of their group.
    pub fn hardware(event: HardwareEvent, is_group_leader: bool) -> Self {
        EventDescriptor {
            source_type: bindings::PERF_TYPE_HARDWARE,
            config: event.code(),
            config1: 0,
            config2: 0,
            leader: is_group_leader,
            read_group: is_group_leader,
            exclude_kernel: false,
            exclude_hv: false,
            inherit: false,
            label: event.name().to_string(),
        }
    }

    /// A raw vendor-specific event code.
    pub fn raw(code: u64, is_group_leader: bool) -> Self {
        EventDescriptor {
            source_type: bindings::PERF_TYPE_RAW,
            config: code,
            config1: 0,
            config2: 0,
            leader: is_group_leader,
            read_group: is_group_leader,
            exclude_kernel: false,
            exclude_hv: false,
            inherit: false,
            label: format!("raw:{code:#x}"),
        }
    }

    /// A DMC-620 clkdiv2 event on the source with the given type id.
    ///
    /// Every field is range-checked against its documented register width;
    /// the `mask`/`match_` pair selects which accesses the counter sees.
    pub fn dmc620(
        source_type: u32,
        event: u64,
        clkdiv2: u64,
        mask: u64,
        match_: u64,
    ) -> Result<Self> {
        check_width("event", event, DMC620_EVENT_BITS)?;
        check_width("clkdiv2", clkdiv2, DMC620_CLKDIV2_BITS)?;
        check_width("mask", mask, DMC620_MASK_BITS)?;
        check_width("match", match_, DMC620_MATCH_BITS)?;

        Ok(EventDescriptor {
            source_type,
            config: mask,
            config1: match_,
            config2: pack_dmc620_control(event, clkdiv2),
            leader: false,
            read_group: false,
            exclude_kernel: false,
            exclude_hv: false,
            inherit: true,
            label: format!("dmc620:{event:#x}/clkdiv2={clkdiv2}/match={match_:#x}"),
        })
    }

    /// Excludes kernel and hypervisor activity from the count.
    pub fn exclude_privileged(mut self) -> Self {
        self.exclude_kernel = true;
        self.exclude_hv = true;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_group_leader(&self) -> bool {
        self.leader
    }
}

fn check_width(field: &'static str, value: u64, width: u32) -> Result<()> {
    if value >> width != 0 {
        return Err(Error::InvalidEventConfig {
            field,
            value,
            width,
        });
    }
    Ok(())
}

pub(crate) fn pack_dmc620_control(event: u64, clkdiv2: u64) -> u64 {
    (clkdiv2 << DMC620_CLKDIV2_SHIFT) | (event << DMC620_EVENT_SHIFT)
}

pub(crate) fn unpack_dmc620_control(config2: u64) -> (u64, u64) {
    let event = (config2 >> DMC620_EVENT_SHIFT) & ((1 << DMC620_EVENT_BITS) - 1);
    let clkdiv2 = (config2 >> DMC620_CLKDIV2_SHIFT) & ((1 << DMC620_CLKDIV2_BITS) - 1);
    (event, clkdiv2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dmc620_control_round_trips_for_all_field_values() {
        for event in 0..(1 << DMC620_EVENT_BITS) {
            for clkdiv2 in 0..(1 << DMC620_CLKDIV2_BITS) {
                let packed = pack_dmc620_control(event, clkdiv2);
                assert_eq!(unpack_dmc620_control(packed), (event, clkdiv2));
            }
        }
    }

    #[test]
    fn dmc620_descriptor_matches_documented_layout() {
        let desc = EventDescriptor::dmc620(7, 0x12, 0x1, 0x1, 0x0).unwrap();
        assert_eq!(desc.source_type, 7);
        assert_eq!(desc.config, 0x1);
        assert_eq!(desc.config1, 0x0);
        // clkdiv2 at bit 9, event 0x12 at bits 3-8
        assert_eq!(desc.config2, (0x1 << 9) | (0x12 << 3));
        assert!(desc.inherit);
        assert!(!desc.is_group_leader());
    }

    #[test]
    fn out_of_width_fields_are_rejected() {
        let err = EventDescriptor::dmc620(7, 1 << 6, 0, 0, 0).unwrap_err();
        assert!(
            matches!(
                err,
                crate::Error::InvalidEventConfig {
                    field: "event",
                    width: 6,
                    ..
                }
            ),
            "{err}"
        );

        assert!(EventDescriptor::dmc620(7, 0, 2, 0, 0).is_err());
        assert!(EventDescriptor::dmc620(7, 0, 0, 1 << 44, 0).is_err());
        assert!(EventDescriptor::dmc620(7, 0, 0, 0, 1 << 44).is_err());

        // Widest legal values are accepted.
        assert!(EventDescriptor::dmc620(7, 0x3f, 1, (1 << 44) - 1, (1 << 44) - 1).is_ok());
    }

    #[test]
    fn leader_descriptors_request_grouped_reads() {
        let leader = EventDescriptor::hardware(HardwareEvent::Cycles, true);
        assert!(leader.is_group_leader());
        assert!(leader.read_group);

        let member = EventDescriptor::hardware(HardwareEvent::Instructions, false);
        assert!(!member.is_group_leader());
        assert!(!member.read_group);
    }

    #[test]
    fn exclude_privileged_sets_both_exclusions() {
        let desc = EventDescriptor::raw(0x70, false).exclude_privileged();
        assert!(desc.exclude_kernel);
        assert!(desc.exclude_hv);
    }
}
