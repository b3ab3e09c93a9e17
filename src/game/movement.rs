//! Per-character movement logic: input intent to desired displacement.
//!
//! The machine owns velocity, jump bookkeeping and the coyote/buffer windows.
//! It never touches the world; grounded state comes in from the controller
//! and the desired displacement goes out to it.
//!
//! Both windows track elapsed time and grant a jump while
//! `elapsed <= window`, so the same wall-clock timing gives the same answer
//! at any tick length.

use serde::{Deserialize, Serialize};

use super::constants::movement as consts;
use super::physics::Vec2;

/// Per-tick input, already debounced by the input layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSnapshot {
    pub move_left: bool,
    pub move_right: bool,
    /// Single-tick pulse; a held button must not keep this set
    pub jump_requested: bool,
}

impl InputSnapshot {
    pub fn direction(&self) -> f32 {
        match (self.move_left, self.move_right) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    Idle,
    Running,
    Jumping,
    Falling,
}

/// Edge events for the effects/animation layer. Emitted once per transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MovementEvent {
    /// `jump_index` is 0 for the first jump of a sequence
    Jumped { jump_index: usize },
    /// Downward speed at touchdown
    Landed { impact_velocity: f32 },
    StateChanged { from: MotionState, to: MotionState },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    pub max_speed: f32,
    pub acceleration: f32,
    pub deceleration: f32,
    pub air_control: f32,
    pub gravity: f32,
    pub terminal_fall_speed: f32,
    /// Launch speed per successive jump; its length is the jump limit
    pub jump_impulses: Vec<f32>,
    pub coyote_time: f32,
    pub jump_buffer_time: f32,
    pub run_threshold: f32,
    pub ground_stick_distance: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            max_speed: consts::MAX_SPEED,
            acceleration: consts::ACCELERATION,
            deceleration: consts::DECELERATION,
            air_control: consts::AIR_CONTROL,
            gravity: consts::GRAVITY,
            terminal_fall_speed: consts::TERMINAL_FALL_SPEED,
            jump_impulses: consts::JUMP_IMPULSES.to_vec(),
            coyote_time: consts::COYOTE_TIME,
            jump_buffer_time: consts::JUMP_BUFFER_TIME,
            run_threshold: consts::RUN_THRESHOLD,
            ground_stick_distance: consts::GROUND_STICK_DISTANCE,
        }
    }
}

impl MovementConfig {
    pub fn max_jumps(&self) -> usize {
        self.jump_impulses.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MovementState {
    pub state: MotionState,
    pub velocity: [f32; 2],
    pub jumps_used: usize,
    pub coyote_timer: f32,
    pub jump_buffer_timer: f32,
    pub facing: f32,
}

/// Result of one tick: the displacement to hand to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionPlan {
    pub desired: Vec2,
    pub jumped: bool,
    pub events: Vec<MovementEvent>,
}

pub struct MovementStateMachine {
    config: MovementConfig,
    state: MotionState,
    velocity: Vec2,
    jumps_used: usize,
    /// Time since the last grounded tick; `None` once the coyote allowance is spent
    airborne_time: Option<f32>,
    /// Age of the latest unconsumed jump request
    jump_request_age: Option<f32>,
    facing: f32,
    was_grounded: bool,
}

fn within_window(elapsed: f32, window: f32) -> bool {
    elapsed <= window + consts::WINDOW_EPSILON
}

fn approach(current: f32, target: f32, max_delta: f32) -> f32 {
    if current < target {
        (current + max_delta).min(target)
    } else {
        (current - max_delta).max(target)
    }
}

impl MovementStateMachine {
    /// Starts airborne with no coyote allowance; the first grounded tick lands it.
    pub fn new(config: MovementConfig) -> Self {
        Self {
            config,
            state: MotionState::Falling,
            velocity: Vec2::zeros(),
            jumps_used: 0,
            airborne_time: None,
            jump_request_age: None,
            facing: 1.0,
            was_grounded: false,
        }
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: MovementConfig) {
        self.config = config;
        self.jumps_used = self.jumps_used.min(self.config.max_jumps());
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    pub fn jumps_used(&self) -> usize {
        self.jumps_used
    }

    /// Coyote time left, 0 when the allowance is spent.
    pub fn coyote_timer(&self) -> f32 {
        self.airborne_time
            .map_or(0.0, |t| (self.config.coyote_time - t).max(0.0))
    }

    /// Time left for the pending jump request, 0 when there is none.
    pub fn jump_buffer_timer(&self) -> f32 {
        self.jump_request_age
            .map_or(0.0, |t| (self.config.jump_buffer_time - t).max(0.0))
    }

    pub fn facing(&self) -> f32 {
        self.facing
    }

    pub fn snapshot(&self) -> MovementState {
        MovementState {
            state: self.state,
            velocity: [self.velocity.x, self.velocity.y],
            jumps_used: self.jumps_used,
            coyote_timer: self.coyote_timer(),
            jump_buffer_timer: self.jump_buffer_timer(),
            facing: self.facing,
        }
    }

    /// Advances one tick. `grounded` is the controller's state after the last step.
    ///
    /// Order matters: windows are refreshed before the jump decision sees them,
    /// and gravity is skipped on the tick a jump launches.
    pub fn update(&mut self, input: &InputSnapshot, grounded: bool, dt: f32) -> MotionPlan {
        let mut events = Vec::new();

        // Ground and coyote
        if grounded {
            self.jumps_used = 0;
            self.airborne_time = Some(0.0);
        } else if let Some(elapsed) = self.airborne_time.as_mut() {
            *elapsed += dt;
        }
        let coyote = self
            .airborne_time
            .is_some_and(|t| within_window(t, self.config.coyote_time));
        let landed = grounded && !self.was_grounded;
        if landed {
            events.push(MovementEvent::Landed {
                impact_velocity: (-self.velocity.y).max(0.0),
            });
        }

        // Jump buffer
        if input.jump_requested {
            self.jump_request_age = Some(0.0);
        } else if let Some(age) = self.jump_request_age.as_mut() {
            *age += dt;
        }
        let buffered = self
            .jump_request_age
            .is_some_and(|t| within_window(t, self.config.jump_buffer_time));
        if !buffered {
            self.jump_request_age = None;
        }

        // Horizontal
        let direction = input.direction();
        let mut rate = if direction != 0.0 {
            self.config.acceleration
        } else {
            self.config.deceleration
        };
        if !grounded {
            rate *= self.config.air_control;
        }
        self.velocity.x = approach(
            self.velocity.x,
            direction * self.config.max_speed,
            rate * dt,
        );
        if direction != 0.0 {
            self.facing = direction;
        }

        // Jump. Once a sequence has started, the remaining jumps are usable in the air.
        let can_leave_ground = grounded || coyote || self.jumps_used > 0;
        let jumped = buffered && self.jumps_used < self.config.max_jumps() && can_leave_ground;
        if jumped {
            let jump_index = self.jumps_used;
            self.velocity.y = self.config.jump_impulses[jump_index];
            self.jumps_used += 1;
            self.jump_request_age = None;
            self.airborne_time = None;
            events.push(MovementEvent::Jumped { jump_index });
        }

        // Vertical
        if !jumped {
            if grounded {
                if self.velocity.y < 0.0 {
                    self.velocity.y = 0.0;
                }
            } else {
                self.velocity.y = (self.velocity.y - self.config.gravity * dt)
                    .max(-self.config.terminal_fall_speed);
            }
        }

        let desired_y = if grounded && !jumped && self.velocity.y <= 0.0 {
            // Keeps the supporting contact in every computation.
            -self.config.ground_stick_distance
        } else {
            self.velocity.y * dt
        };

        let next = self.derive_state(grounded && !jumped);
        if next != self.state {
            events.push(MovementEvent::StateChanged {
                from: self.state,
                to: next,
            });
            self.state = next;
        }
        self.was_grounded = grounded;

        MotionPlan {
            desired: Vec2::new(self.velocity.x * dt, desired_y),
            jumped,
            events,
        }
    }

    /// Feeds the corrected translation back: a clipped upward move is a head bump.
    pub fn resolve_after_move(&mut self, plan: &MotionPlan, corrected: &Vec2) {
        if plan.desired.y > 0.0 && corrected.y + 1.0e-4 < plan.desired.y {
            self.velocity.y = 0.0;
        }
    }

    fn derive_state(&self, on_ground: bool) -> MotionState {
        if on_ground {
            if self.velocity.x.abs() > self.config.run_threshold {
                MotionState::Running
            } else {
                MotionState::Idle
            }
        } else if self.velocity.y > 0.0 {
            MotionState::Jumping
        } else {
            MotionState::Falling
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn idle() -> InputSnapshot {
        InputSnapshot::default()
    }

    fn jump() -> InputSnapshot {
        InputSnapshot {
            jump_requested: true,
            ..Default::default()
        }
    }

    fn right() -> InputSnapshot {
        InputSnapshot {
            move_right: true,
            ..Default::default()
        }
    }

    fn grounded_machine() -> MovementStateMachine {
        let mut machine = MovementStateMachine::new(MovementConfig::default());
        for _ in 0..3 {
            machine.update(&idle(), true, DT);
        }
        machine
    }

    /// Leaves the ground, then requests a jump on airborne tick `k`.
    fn coyote_attempt(k: usize, dt: f32) -> bool {
        let mut machine = grounded_machine();
        for _ in 1..k {
            assert!(!machine.update(&idle(), false, dt).jumped);
        }
        machine.update(&jump(), false, dt).jumped
    }

    /// Requests a jump while falling, lands `k` ticks later.
    fn buffer_attempt(k: usize, dt: f32) -> bool {
        let mut machine = MovementStateMachine::new(MovementConfig::default());
        assert!(!machine.update(&jump(), false, dt).jumped);
        for _ in 1..k {
            assert!(!machine.update(&idle(), false, dt).jumped);
        }
        machine.update(&idle(), true, dt).jumped
    }

    #[test]
    fn test_first_ground_contact_lands_once() {
        let mut machine = MovementStateMachine::new(MovementConfig::default());
        for _ in 0..10 {
            machine.update(&idle(), false, DT);
        }
        let falling_speed = -machine.velocity().y;

        let plan = machine.update(&idle(), true, DT);
        assert!(plan.events.contains(&MovementEvent::Landed {
            impact_velocity: falling_speed
        }));
        assert!(plan.events.contains(&MovementEvent::StateChanged {
            from: MotionState::Falling,
            to: MotionState::Idle,
        }));
        assert_eq!(machine.velocity().y, 0.0);

        let plan = machine.update(&idle(), true, DT);
        assert!(plan.events.is_empty(), "No events on steady ticks: {:?}", plan.events);
    }

    #[test]
    fn test_zero_input_on_ground_stays_idle() {
        let mut machine = grounded_machine();
        for _ in 0..120 {
            let plan = machine.update(&idle(), true, DT);
            assert_eq!(plan.desired.x, 0.0);
            assert!(plan.desired.y <= 0.0);
            assert_eq!(machine.state(), MotionState::Idle);
        }
    }

    #[test]
    fn test_release_stops_faster_than_start() {
        let mut machine = grounded_machine();
        let mut ticks_to_top = 0;
        while machine.velocity().x < consts::MAX_SPEED {
            machine.update(&right(), true, DT);
            ticks_to_top += 1;
        }
        assert_eq!(machine.state(), MotionState::Running);

        let mut ticks_to_stop = 0;
        while machine.velocity().x > 0.0 {
            machine.update(&idle(), true, DT);
            ticks_to_stop += 1;
        }
        println!("accelerate: {} ticks, stop: {} ticks", ticks_to_top, ticks_to_stop);
        assert!(ticks_to_stop < ticks_to_top);
        assert_eq!(machine.state(), MotionState::Idle);
    }

    #[test]
    fn test_air_control_scales_acceleration() {
        let mut ground = grounded_machine();
        ground.update(&right(), true, DT);
        let mut air = MovementStateMachine::new(MovementConfig::default());
        air.update(&right(), false, DT);
        assert!((air.velocity().x - ground.velocity().x * consts::AIR_CONTROL).abs() < 1e-5);
        assert_eq!(air.facing(), 1.0);
    }

    #[test]
    fn test_jump_skips_gravity_on_launch_tick() {
        let mut machine = grounded_machine();
        let plan = machine.update(&jump(), true, DT);
        assert!(plan.jumped);
        assert_eq!(machine.velocity().y, consts::JUMP_IMPULSES[0]);
        assert!((plan.desired.y - consts::JUMP_IMPULSES[0] * DT).abs() < 1e-6);
        assert_eq!(machine.jump_buffer_timer(), 0.0);
        assert_eq!(machine.coyote_timer(), 0.0);
        assert_eq!(machine.state(), MotionState::Jumping);
        assert!(plan.events.contains(&MovementEvent::Jumped { jump_index: 0 }));

        machine.update(&idle(), false, DT);
        let expected = consts::JUMP_IMPULSES[0] - consts::GRAVITY * DT;
        assert!((machine.velocity().y - expected).abs() < 1e-5);
    }

    #[test]
    fn test_triple_jump_then_denied() {
        let mut machine = grounded_machine();
        let mut launches = Vec::new();

        for i in 0..4 {
            let grounded = i == 0;
            let plan = machine.update(&jump(), grounded, DT);
            if plan.jumped {
                launches.push(machine.velocity().y);
            }
            for _ in 0..10 {
                machine.update(&idle(), false, DT);
            }
        }

        // The fourth request is absent from the launches.
        assert_eq!(launches, consts::JUMP_IMPULSES.to_vec());
        assert_eq!(machine.jumps_used(), 3);
    }

    #[test]
    fn test_coyote_window_boundary() {
        // Window 0.1 s: 5 ticks (0.083 s) after leaving ground succeeds, 7 (0.117 s) fails.
        assert!(coyote_attempt(1, DT));
        assert!(coyote_attempt(5, DT));
        assert!(!coyote_attempt(7, DT));
        assert!(!coyote_attempt(30, DT));
    }

    #[test]
    fn test_coyote_window_edge_is_frame_rate_independent() {
        // A request exactly 0.1 s after leaving ground is granted at every tick length.
        for (dt, ticks) in [(0.05, 2), (0.025, 4), (1.0 / 60.0, 6), (0.02, 5)] {
            assert!(coyote_attempt(ticks, dt), "dt={} at the window edge", dt);
            assert!(!coyote_attempt(ticks + 1, dt), "dt={} past the window", dt);
        }
    }

    #[test]
    fn test_coyote_timer_decays_monotonically() {
        let mut machine = grounded_machine();
        assert_eq!(machine.coyote_timer(), consts::COYOTE_TIME);
        let mut last = machine.coyote_timer();
        for _ in 0..20 {
            machine.update(&idle(), false, DT);
            assert!(machine.coyote_timer() <= last);
            assert!(machine.coyote_timer() >= 0.0);
            last = machine.coyote_timer();
        }
        assert_eq!(machine.coyote_timer(), 0.0);
    }

    #[test]
    fn test_jump_buffer_boundary() {
        // Window 0.12 s: landing 6 ticks (0.1 s) after the request jumps, 9 (0.15 s) does not.
        assert!(buffer_attempt(1, DT));
        assert!(buffer_attempt(6, DT));
        assert!(!buffer_attempt(9, DT));
    }

    #[test]
    fn test_jump_buffer_edge_is_frame_rate_independent() {
        // Landing exactly 0.12 s after the request jumps at every tick length.
        for (dt, ticks) in [(0.04, 3), (0.03, 4), (0.02, 6), (0.01, 12)] {
            assert!(buffer_attempt(ticks, dt), "dt={} at the window edge", dt);
            assert!(!buffer_attempt(ticks + 1, dt), "dt={} past the window", dt);
        }
    }

    #[test]
    fn test_buffered_request_yields_one_jump() {
        let mut machine = MovementStateMachine::new(MovementConfig::default());
        machine.update(&jump(), false, DT);
        assert!(machine.update(&idle(), true, DT).jumped);
        // Still reported grounded next tick (e.g. under a low ceiling): no second launch.
        assert!(!machine.update(&idle(), true, DT).jumped);
    }

    #[test]
    fn test_jumps_used_bounded_and_reset_on_ground() {
        let mut machine = grounded_machine();
        let pattern = [true, false, false, true, false, true, true, true, false, false];
        for round in 0..20 {
            for (i, &request) in pattern.iter().enumerate() {
                let grounded = i == 0 && round % 2 == 0;
                let input = InputSnapshot {
                    jump_requested: request,
                    ..Default::default()
                };
                let plan = machine.update(&input, grounded, DT);
                assert!(machine.jumps_used() <= machine.config().max_jumps());
                if grounded {
                    let expected = if plan.jumped { 1 } else { 0 };
                    assert_eq!(machine.jumps_used(), expected);
                }
            }
        }
    }

    #[test]
    fn test_fall_speed_is_clamped() {
        let mut machine = MovementStateMachine::new(MovementConfig::default());
        for _ in 0..600 {
            machine.update(&idle(), false, DT);
        }
        assert_eq!(machine.velocity().y, -consts::TERMINAL_FALL_SPEED);
        assert_eq!(machine.state(), MotionState::Falling);
    }

    #[test]
    fn test_head_bump_cancels_ascent() {
        let mut machine = grounded_machine();
        let plan = machine.update(&jump(), true, DT);
        machine.resolve_after_move(&plan, &Vec2::new(0.0, plan.desired.y * 0.25));
        assert_eq!(machine.velocity().y, 0.0);

        let mut machine = grounded_machine();
        let plan = machine.update(&jump(), true, DT);
        machine.resolve_after_move(&plan, &plan.desired);
        assert_eq!(machine.velocity().y, consts::JUMP_IMPULSES[0]);
    }
}
