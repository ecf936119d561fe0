//! In-memory model of the pneumatics hardware.
//!
//! [`Plant`] records what the simulated controller believes about its valves,
//! covers and vents.  Every mutator returns the controller events the change
//! produces, in the order a real controller writes them; the caller decides
//! when to put them on the wire.  Nothing here sleeps or does I/O.

use atpneumatics_types::{
    AirValveState, CellVentState, ControllerEvent, M1CoverLimitSwitches, M1VentsLimitSwitches,
    MirrorCoverState, PowerStatus, SummaryState, TelemetryMessage, VentsPosition,
};

use crate::simulator::SimulatorConfig;

// ────────────────────────────────────────────────────────────────────────────
// Motion tracking
// ────────────────────────────────────────────────────────────────────────────

/// Where a moving assembly (M1 covers or cell vents) is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenCloseState {
    Opening,
    Open,
    Closing,
    Closed,
}

impl OpenCloseState {
    /// Mark the start of a move towards `open`.
    ///
    /// Returns `false` (and leaves the state alone) when the assembly is
    /// already moving towards, or resting at, that end.
    pub fn begin(&mut self, open: bool) -> bool {
        match (open, *self) {
            (true, OpenCloseState::Opening | OpenCloseState::Open) => false,
            (false, OpenCloseState::Closing | OpenCloseState::Closed) => false,
            (true, _) => {
                *self = OpenCloseState::Opening;
                true
            }
            (false, _) => {
                *self = OpenCloseState::Closing;
                true
            }
        }
    }

    pub fn finish(&mut self, open: bool) {
        *self = if open {
            OpenCloseState::Open
        } else {
            OpenCloseState::Closed
        };
    }
}

/// The four air valves the controller can switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Valve {
    Instrument,
    Main,
    M1,
    M2,
}

/// Mirrors with a regulated air supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    M1,
    M2,
}

// ────────────────────────────────────────────────────────────────────────────
// Plant
// ────────────────────────────────────────────────────────────────────────────

/// Snapshot of the simulated pneumatics hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct Plant {
    pub covers_motion: OpenCloseState,
    pub vents_motion: OpenCloseState,

    pub cell_vents_state: CellVentState,
    pub e_stop: bool,
    pub instrument_state: AirValveState,
    pub m1_cover_limit_switches: M1CoverLimitSwitches,
    pub m1_cover_state: MirrorCoverState,
    pub m1_pressure: f64,
    pub m1_state: AirValveState,
    pub m1_vents_limit_switches: M1VentsLimitSwitches,
    pub m1_vents_position: VentsPosition,
    pub m2_pressure: f64,
    pub m2_state: AirValveState,
    pub main_valve_state: AirValveState,
    pub power_status: PowerStatus,
    pub summary_state: SummaryState,

    pub main_air_source_pressure: f64,
    pub cell_load: f64,
}

impl Default for Plant {
    fn default() -> Self {
        Self {
            covers_motion: OpenCloseState::Closed,
            vents_motion: OpenCloseState::Closed,
            cell_vents_state: CellVentState::Closed,
            e_stop: false,
            instrument_state: AirValveState::Closed,
            m1_cover_limit_switches: M1CoverLimitSwitches::default(),
            m1_cover_state: MirrorCoverState::Closed,
            m1_pressure: 0.0,
            m1_state: AirValveState::Closed,
            m1_vents_limit_switches: M1VentsLimitSwitches::default(),
            m1_vents_position: VentsPosition::Closed,
            m2_pressure: 0.0,
            m2_state: AirValveState::Closed,
            main_valve_state: AirValveState::Closed,
            power_status: PowerStatus::default(),
            summary_state: SummaryState::Standby,
            main_air_source_pressure: 0.0,
            cell_load: 0.0,
        }
    }
}

impl Plant {
    /// Apply the configured set points.
    pub fn configure(&mut self, config: &SimulatorConfig) -> Vec<ControllerEvent> {
        self.m1_pressure = config.m1_pressure;
        self.m2_pressure = config.m2_pressure;
        self.main_air_source_pressure = config.main_pressure;
        self.cell_load = config.cell_load;
        vec![
            ControllerEvent::M1SetPressure {
                pressure: self.m1_pressure,
            },
            ControllerEvent::M2SetPressure {
                pressure: self.m2_pressure,
            },
        ]
    }

    /// Power-up state reported to a freshly connected client: vents and
    /// covers closed, every valve open, all power lines on.
    pub fn initialize(&mut self) -> Vec<ControllerEvent> {
        self.e_stop = false;
        let mut events = vec![ControllerEvent::EStop {
            triggered: self.e_stop,
        }];
        events.extend(self.set_cell_vents(true, false));
        events.extend(self.set_m1_cover(true, false));
        for valve in [Valve::Instrument, Valve::M1, Valve::M2, Valve::Main] {
            events.push(self.set_valve(valve, true));
        }
        self.power_status = PowerStatus {
            power_on_l1: true,
            power_on_l2: true,
            power_on_l3: true,
        };
        events.push(ControllerEvent::PowerStatus(self.power_status));
        events
    }

    pub fn set_valve(&mut self, valve: Valve, open: bool) -> ControllerEvent {
        let state = AirValveState::from_open(open);
        match valve {
            Valve::Instrument => {
                self.instrument_state = state;
                ControllerEvent::InstrumentState { state }
            }
            Valve::Main => {
                self.main_valve_state = state;
                ControllerEvent::MainValveState { state }
            }
            Valve::M1 => {
                self.m1_state = state;
                ControllerEvent::M1State { state }
            }
            Valve::M2 => {
                self.m2_state = state;
                ControllerEvent::M2State { state }
            }
        }
    }

    pub fn set_pressure(&mut self, mirror: Mirror, pressure: f64) -> ControllerEvent {
        match mirror {
            Mirror::M1 => {
                self.m1_pressure = pressure;
                ControllerEvent::M1SetPressure { pressure }
            }
            Mirror::M2 => {
                self.m2_pressure = pressure;
                ControllerEvent::M2SetPressure { pressure }
            }
        }
    }

    /// Drive the vents limit switches.  Both switches released means the
    /// vents are travelling.
    pub fn set_cell_vents(&mut self, closed: bool, opened: bool) -> Vec<ControllerEvent> {
        let mut events = Vec::with_capacity(4);
        if !(closed || opened) {
            self.cell_vents_state = CellVentState::InMotion;
            events.push(ControllerEvent::CellVentsState {
                state: self.cell_vents_state,
            });
        }

        self.m1_vents_limit_switches = M1VentsLimitSwitches {
            vents_closed_active: closed,
            vents_opened_active: opened,
        };
        events.push(ControllerEvent::M1VentsLimitSwitches(
            self.m1_vents_limit_switches,
        ));

        self.m1_vents_position = if opened {
            VentsPosition::Opened
        } else if closed {
            VentsPosition::Closed
        } else {
            VentsPosition::PartiallyOpened
        };
        events.push(ControllerEvent::M1VentsPosition {
            position: self.m1_vents_position,
        });

        if opened {
            self.cell_vents_state = CellVentState::Opened;
        } else if closed {
            self.cell_vents_state = CellVentState::Closed;
        }
        events.push(ControllerEvent::CellVentsState {
            state: self.cell_vents_state,
        });
        events
    }

    /// Drive all four cover petal limit switches together.
    pub fn set_m1_cover(&mut self, closed: bool, opened: bool) -> Vec<ControllerEvent> {
        self.m1_cover_limit_switches = M1CoverLimitSwitches::uniform(closed, opened);
        self.m1_cover_state = match (closed, opened) {
            (true, true) => MirrorCoverState::Invalid,
            (false, true) => MirrorCoverState::Opened,
            (true, false) => MirrorCoverState::Closed,
            (false, false) => MirrorCoverState::InMotion,
        };
        vec![
            ControllerEvent::M1CoverLimitSwitches(self.m1_cover_limit_switches),
            ControllerEvent::M1CoverState {
                state: self.m1_cover_state,
            },
        ]
    }

    /// `true` when the covers already report the end position for `open`.
    pub fn cover_at(&self, open: bool) -> bool {
        let target = if open {
            MirrorCoverState::Opened
        } else {
            MirrorCoverState::Closed
        };
        self.m1_cover_state == target
    }

    /// `true` when the vents already report the end position for `open`.
    pub fn vents_at(&self, open: bool) -> bool {
        let target = if open {
            VentsPosition::Opened
        } else {
            VentsPosition::Closed
        };
        self.m1_vents_position == target
    }

    pub fn set_summary_state(&mut self, summary_state: SummaryState) -> ControllerEvent {
        self.summary_state = summary_state;
        ControllerEvent::SummaryState { summary_state }
    }

    /// One telemetry sample.  A mirror line only carries its set pressure
    /// while both the main valve and that mirror's valve are open.
    pub fn telemetry(&self) -> [TelemetryMessage; 4] {
        let main_open = self.main_valve_state == AirValveState::Opened;
        let line = |valve: AirValveState, set_point: f64| {
            if main_open && valve == AirValveState::Opened {
                set_point
            } else {
                0.0
            }
        };
        [
            TelemetryMessage::M1AirPressure {
                pressure: line(self.m1_state, self.m1_pressure),
            },
            TelemetryMessage::M2AirPressure {
                pressure: line(self.m2_state, self.m2_pressure),
            },
            TelemetryMessage::MainAirSourcePressure {
                pressure: self.main_air_source_pressure,
            },
            TelemetryMessage::LoadCell {
                cell_load: self.cell_load,
            },
        ]
    }
}
