//! Queries about a wave.

use crate::err::DbgErr;
use crate::flags::{StopReason, WaveState};
use crate::ids::{AgentId, ArchitectureId, DispatchId, ProcessId, QueueId, WatchpointId};
use crate::process::Substrate;

use super::Wave;

/// A property of a wave.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum WaveInfoQuery {
    /// The state reported to the client.
    State,
    /// Why the wave stopped.
    StopReason,
    /// The wave's dispatch.
    Dispatch,
    /// The wave's queue.
    Queue,
    /// The wave's agent.
    Agent,
    /// The wave's process.
    Process,
    /// The wave's architecture.
    Architecture,
    /// The wave's pc.
    Pc,
    /// The wave's execution mask.
    ExecMask,
    /// Coordinates of the wave's work-group in the dispatch grid.
    WorkGroupCoord,
    /// Position of the wave in its work-group.
    WaveNumberInWorkGroup,
    /// Watchpoints that triggered on the wave.
    Watchpoints,
    /// Number of lanes in the wave.
    LaneCount,
}
impl WaveInfoQuery {
    /// Whether the query is only answered for a wave the client sees stopped.
    pub fn requires_stop(self) -> bool {
        matches!(self, Self::StopReason | Self::Pc | Self::ExecMask | Self::Watchpoints)
    }
}

/// The answer to a [`WaveInfoQuery`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum WaveInfo {
    /// See [`WaveInfoQuery::State`].
    State(WaveState),
    /// See [`WaveInfoQuery::StopReason`].
    StopReason(StopReason),
    /// See [`WaveInfoQuery::Dispatch`].
    Dispatch(DispatchId),
    /// See [`WaveInfoQuery::Queue`].
    Queue(QueueId),
    /// See [`WaveInfoQuery::Agent`].
    Agent(AgentId),
    /// See [`WaveInfoQuery::Process`].
    Process(ProcessId),
    /// See [`WaveInfoQuery::Architecture`].
    Architecture(ArchitectureId),
    /// See [`WaveInfoQuery::Pc`].
    Pc(u64),
    /// See [`WaveInfoQuery::ExecMask`].
    ExecMask(u64),
    /// See [`WaveInfoQuery::WorkGroupCoord`].
    WorkGroupCoord([u32; 3]),
    /// See [`WaveInfoQuery::WaveNumberInWorkGroup`].
    WaveNumberInWorkGroup(u32),
    /// See [`WaveInfoQuery::Watchpoints`].
    Watchpoints(Vec<WatchpointId>),
    /// See [`WaveInfoQuery::LaneCount`].
    LaneCount(usize),
}

impl Wave {
    /// Answers a query about the wave.
    ///
    /// Queries about the dispatch grid fail with [`DbgErr::NotAvailable`]
    /// for a wave whose dispatch is unknown.
    /// This does not check [`WaveInfoQuery::requires_stop`].
    pub fn get_info(&self, sub: &mut Substrate, query: WaveInfoQuery) -> Result<WaveInfo, DbgErr> {
        let info = match query {
            WaveInfoQuery::State        => WaveInfo::State(self.client_visible_state(&sub.events)),
            WaveInfoQuery::StopReason   => WaveInfo::StopReason(self.stop_reason()),
            WaveInfoQuery::Dispatch     => WaveInfo::Dispatch(self.dispatch().ok_or(DbgErr::NotAvailable)?),
            WaveInfoQuery::Queue        => WaveInfo::Queue(self.queue()),
            WaveInfoQuery::Agent        => WaveInfo::Agent(self.agent()),
            WaveInfoQuery::Process      => WaveInfo::Process(sub.process_id()),
            WaveInfoQuery::Architecture => WaveInfo::Architecture(self.architecture().id()),
            WaveInfoQuery::Pc           => WaveInfo::Pc(self.pc(sub)?),
            WaveInfoQuery::ExecMask     => WaveInfo::ExecMask(self.exec_mask(sub)?),
            WaveInfoQuery::WorkGroupCoord => {
                self.dispatch().ok_or(DbgErr::NotAvailable)?;
                WaveInfo::WorkGroupCoord(self.group_ids())
            },
            WaveInfoQuery::WaveNumberInWorkGroup => {
                self.dispatch().ok_or(DbgErr::NotAvailable)?;
                WaveInfo::WaveNumberInWorkGroup(self.wave_in_group())
            },
            WaveInfoQuery::Watchpoints => {
                let triggered = self.architecture().triggered_watchpoints(self, sub)?;
                let watchpoints = triggered.into_iter()
                    .map(|os_id| sub.watchpoint(os_id)
                        .unwrap_or_else(|| panic!("watch slot {os_id} not set on {}", self.agent()))
                    )
                    .collect();
                WaveInfo::Watchpoints(watchpoints)
            },
            WaveInfoQuery::LaneCount => WaveInfo::LaneCount(self.lane_count()),
        };
        Ok(info)
    }
}
