use std::io;

use perf_event_open_sys::{self as sys, bindings::perf_event_attr};
use smallvec::SmallVec;

use crate::event::EventDescriptor;
use crate::read_format::{demux, grouped_read_size};
use crate::{Error, Result};

/// Which processes and CPUs a counter observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pid: i32,
    cpu: i32,
}

impl Scope {
    /// Count events of the calling process on any CPU.
    pub fn calling_process() -> Self {
        Scope { pid: 0, cpu: -1 }
    }

    /// Count events of every process on one CPU.
    pub fn system_wide(cpu: i32) -> Self {
        Scope { pid: -1, cpu }
    }
}

/// Lifecycle of a counter session. Control operations are only legal in the
/// order `reset` (Armed), `enable` (Running), `disable` (Stopped); reads are
/// legal while Running or Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Armed,
    Running,
    Stopped,
    Closed,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            SessionState::Created => "Created",
            SessionState::Armed => "Armed",
            SessionState::Running => "Running",
            SessionState::Stopped => "Stopped",
            SessionState::Closed => "Closed",
        }
    }

    fn check(self, op: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self) {
            return Ok(());
        }
        Err(Error::InvalidSessionState {
            op,
            state: self.name(),
        })
    }
}

fn to_attr(desc: &EventDescriptor, disabled: bool) -> perf_event_attr {
    let mut attr = perf_event_attr::default();
    attr.size = std::mem::size_of::<perf_event_attr>() as u32;
    attr.type_ = desc.source_type;
    attr.config = desc.config;
    attr.config1 = desc.config1;
    attr.config2 = desc.config2;
    if desc.read_group {
        attr.read_format =
            sys::bindings::PERF_FORMAT_GROUP as u64 | sys::bindings::PERF_FORMAT_ID as u64;
    }
    attr.set_disabled(disabled as u64);
    attr.set_inherit(desc.inherit as u64);
    attr.set_exclude_kernel(desc.exclude_kernel as u64);
    attr.set_exclude_hv(desc.exclude_hv as u64);
    attr
}

fn open_fd(desc: &EventDescriptor, scope: Scope, group_fd: i32, disabled: bool) -> Result<i32> {
    let mut attr = to_attr(desc, disabled);
    let fd = unsafe { sys::perf_event_open(&mut attr, scope.pid, scope.cpu, group_fd, 0) };
    if fd < 0 {
        return Err(Error::Open {
            label: desc.label().to_string(),
            source: io::Error::last_os_error(),
        });
    }
    log::debug!("opened counter '{}' (fd {fd})", desc.label());
    Ok(fd)
}

fn counter_id(fd: i32) -> Result<u64> {
    let mut id = 0u64;
    let res = unsafe { sys::ioctls::ID(fd, &mut id) };
    if res < 0 {
        return Err(Error::Io {
            op: "counter id retrieval",
            source: io::Error::last_os_error(),
        });
    }
    Ok(id)
}

/// One standalone counter, controlled and read on its own.
#[derive(Debug)]
pub struct Counter {
    fd: i32,
    state: SessionState,
    label: String,
}

impl Counter {
    /// Opens a single ungrouped counter, initially disabled.
    ///
    /// # Panics
    ///
    /// Panics if the descriptor was built as a group leader; grouped
    /// descriptors belong to [`GroupSession`].
    pub fn open(desc: &EventDescriptor, scope: Scope) -> Result<Self> {
        assert!(
            !desc.is_group_leader(),
            "group leader descriptors must be opened through GroupSession"
        );
        let fd = open_fd(desc, scope, -1, true)?;
        Ok(Counter {
            fd,
            state: SessionState::Created,
            label: desc.label().to_string(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn reset(&mut self) -> Result<()> {
        self.state.check(
            "reset",
            &[
                SessionState::Created,
                SessionState::Armed,
                SessionState::Stopped,
            ],
        )?;
        self.ioctl("counter reset", |fd| unsafe { sys::ioctls::RESET(fd, 0) })?;
        self.state = SessionState::Armed;
        Ok(())
    }

    pub fn enable(&mut self) -> Result<()> {
        self.state
            .check("enable", &[SessionState::Created, SessionState::Armed])?;
        self.ioctl("counter enable", |fd| unsafe { sys::ioctls::ENABLE(fd, 0) })?;
        self.state = SessionState::Running;
        Ok(())
    }

    pub fn disable(&mut self) -> Result<()> {
        self.state.check("disable", &[SessionState::Running])?;
        self.ioctl("counter disable", |fd| unsafe {
            sys::ioctls::DISABLE(fd, 0)
        })?;
        self.state = SessionState::Stopped;
        Ok(())
    }

    /// Reads the raw 64-bit counter value.
    pub fn read(&mut self) -> Result<u64> {
        self.state
            .check("read", &[SessionState::Running, SessionState::Stopped])?;
        let mut value = 0u64;
        let n = unsafe {
            libc::read(
                self.fd,
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            return Err(Error::Io {
                op: "counter read",
                source: io::Error::last_os_error(),
            });
        }
        if (n as usize) < std::mem::size_of::<u64>() {
            return Err(Error::ShortRead {
                got: 0,
                expected: 1,
            });
        }
        Ok(value)
    }

    fn ioctl(&self, op: &'static str, f: impl Fn(i32) -> i32) -> Result<()> {
        if f(self.fd) < 0 {
            return Err(Error::Io {
                op,
                source: io::Error::last_os_error(),
            });
        }
        log::debug!("{op} applied to '{}'", self.label);
        Ok(())
    }
}

impl Drop for Counter {
    fn drop(&mut self) {
        self.state = SessionState::Closed;
        unsafe { libc::close(self.fd) };
    }
}

/// A leader and its members, controlled atomically as one unit.
///
/// Members carry no public handle of their own: every control operation goes
/// through the leader with `PERF_IOC_FLAG_GROUP`, so the whole group changes
/// state together and a member can never diverge from its leader.
#[derive(Debug)]
pub struct GroupSession {
    // Leader first, then members in creation order. `ids[i]` is the
    // facility id of `fds[i]`, captured at open time for demultiplexing.
    fds: SmallVec<[i32; 8]>,
    ids: SmallVec<[u64; 8]>,
    state: SessionState,
}

impl GroupSession {
    /// Opens the leader, then every member against the leader's handle.
    ///
    /// On any failure every handle opened so far is closed before the error
    /// is returned; a partially opened group never escapes.
    ///
    /// # Panics
    ///
    /// Panics if `leader` was not built with `is_group_leader`, or if any
    /// member was.
    pub fn open(
        leader: &EventDescriptor,
        members: &[EventDescriptor],
        scope: Scope,
    ) -> Result<Self> {
        assert!(
            leader.is_group_leader(),
            "leader descriptor must be built with is_group_leader"
        );
        assert!(
            members.iter().all(|m| !m.is_group_leader()),
            "member descriptors must not be group leaders"
        );

        let mut fds: SmallVec<[i32; 8]> = SmallVec::new();
        match Self::open_all(leader, members, scope, &mut fds) {
            Ok(ids) => Ok(GroupSession {
                fds,
                ids,
                state: SessionState::Created,
            }),
            Err(err) => {
                for fd in fds.drain(..).rev() {
                    unsafe { libc::close(fd) };
                }
                Err(err)
            }
        }
    }

    fn open_all(
        leader: &EventDescriptor,
        members: &[EventDescriptor],
        scope: Scope,
        fds: &mut SmallVec<[i32; 8]>,
    ) -> Result<SmallVec<[u64; 8]>> {
        let leader_fd = open_fd(leader, scope, -1, true)?;
        fds.push(leader_fd);

        let mut ids: SmallVec<[u64; 8]> = SmallVec::new();
        ids.push(counter_id(leader_fd)?);

        // Members open enabled but gated: nothing counts until the leader
        // is enabled.
        for desc in members {
            let fd = open_fd(desc, scope, leader_fd, false)?;
            fds.push(fd);
            ids.push(counter_id(fd)?);
        }

        Ok(ids)
    }

    /// Total number of counters, leader included.
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Facility-issued counter ids in creation order, leader first. These
    /// are the ids grouped-read payload entries are tagged with.
    pub fn counter_ids(&self) -> &[u64] {
        &self.ids
    }

    /// Zeroes every counter in the group through the leader.
    pub fn reset(&mut self) -> Result<()> {
        self.state.check(
            "reset",
            &[
                SessionState::Created,
                SessionState::Armed,
                SessionState::Stopped,
            ],
        )?;
        self.leader_ioctl("group reset", |fd, flags| unsafe {
            sys::ioctls::RESET(fd, flags)
        })?;
        self.state = SessionState::Armed;
        Ok(())
    }

    /// Starts every counter in the group through the leader.
    pub fn enable(&mut self) -> Result<()> {
        self.state
            .check("enable", &[SessionState::Created, SessionState::Armed])?;
        self.leader_ioctl("group enable", |fd, flags| unsafe {
            sys::ioctls::ENABLE(fd, flags)
        })?;
        self.state = SessionState::Running;
        Ok(())
    }

    /// Stops every counter in the group through the leader.
    pub fn disable(&mut self) -> Result<()> {
        self.state.check("disable", &[SessionState::Running])?;
        self.leader_ioctl("group disable", |fd, flags| unsafe {
            sys::ioctls::DISABLE(fd, flags)
        })?;
        self.state = SessionState::Stopped;
        Ok(())
    }

    /// Reads the whole group in one call and returns the values in creation
    /// order, leader first.
    pub fn read(&mut self) -> Result<Vec<u64>> {
        self.state
            .check("read", &[SessionState::Running, SessionState::Stopped])?;
        let mut buf = vec![0u8; grouped_read_size(self.fds.len())];
        let n = unsafe {
            libc::read(
                self.fds[0],
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if n < 0 {
            return Err(Error::Io {
                op: "grouped counter read",
                source: io::Error::last_os_error(),
            });
        }
        demux(&buf[..n as usize], &self.ids)
    }

    fn leader_ioctl(&self, op: &'static str, f: impl Fn(i32, libc::c_uint) -> i32) -> Result<()> {
        if f(self.fds[0], sys::bindings::PERF_IOC_FLAG_GROUP) < 0 {
            return Err(Error::Io {
                op,
                source: io::Error::last_os_error(),
            });
        }
        log::debug!("{op} applied to {} counters", self.fds.len());
        Ok(())
    }
}

impl Drop for GroupSession {
    fn drop(&mut self) {
        self.state = SessionState::Closed;
        for fd in self.fds.drain(..).rev() {
            unsafe { libc::close(fd) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HardwareEvent;
    use smallvec::smallvec;

    fn dummy_session(state: SessionState) -> GroupSession {
        GroupSession {
            fds: smallvec![-1],
            ids: smallvec![0],
            state,
        }
    }

    #[test]
    fn control_operations_are_rejected_out_of_order() {
        let mut session = dummy_session(SessionState::Created);
        let err = session.disable().unwrap_err();
        assert!(
            matches!(
                err,
                Error::InvalidSessionState {
                    op: "disable",
                    state: "Created"
                }
            ),
            "{err}"
        );

        let err = session.read().unwrap_err();
        assert!(matches!(err, Error::InvalidSessionState { op: "read", .. }));
    }

    #[test]
    fn stopped_sessions_cannot_be_disabled_again() {
        let mut session = dummy_session(SessionState::Stopped);
        assert!(session.disable().is_err());
    }

    #[test]
    fn leader_attr_requests_grouped_read_format() {
        let leader = EventDescriptor::hardware(HardwareEvent::Cycles, true);
        let attr = to_attr(&leader, true);
        assert_eq!(
            attr.read_format,
            sys::bindings::PERF_FORMAT_GROUP as u64 | sys::bindings::PERF_FORMAT_ID as u64
        );

        let member = EventDescriptor::hardware(HardwareEvent::Instructions, false);
        let attr = to_attr(&member, false);
        assert_eq!(attr.read_format, 0);
    }

    #[test]
    fn attr_carries_descriptor_configs() {
        let desc = EventDescriptor::dmc620(9, 0x12, 0x1, 0x1, 0x1).unwrap();
        let attr = to_attr(&desc, true);
        assert_eq!(attr.type_, 9);
        assert_eq!(attr.config, 0x1);
        assert_eq!(attr.config1, 0x1);
        assert_eq!(attr.config2, (0x1 << 9) | (0x12 << 3));
    }
}
