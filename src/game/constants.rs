//! Physics, controller and movement defaults.
//! Centralizing these keeps the config defaults and the tests in agreement.

/// Physics world constants
pub mod physics {
    /// World gravity in m/s² (applies to dynamic props; characters integrate their own)
    pub const DEFAULT_GRAVITY: f32 = 30.0;

    /// Fixed timestep for physics simulation (60 Hz)
    pub const TIMESTEP: f32 = 1.0 / 60.0;

    /// Maximum fixed substeps run for one rendered frame
    pub const MAX_SUBSTEPS: u32 = 3;

    /// Longest real frame time accepted before accumulation (seconds)
    pub const MAX_FRAME_TIME: f32 = 0.25;

    /// Solver iterations per step
    pub const SOLVER_ITERATIONS: usize = 8;

    /// Contact spring natural frequency (rapier's error-reduction knob)
    pub const CONTACT_NATURAL_FREQUENCY: f32 = 30.0;

    /// Contact spring damping ratio
    pub const CONTACT_DAMPING_RATIO: f32 = 5.0;

    /// Collision events kept between two steps
    pub const EVENT_CAPACITY: usize = 256;

    /// Small epsilon for float comparisons
    pub const EPSILON: f32 = 0.001;
}

/// Character controller defaults
pub mod controller {
    /// Gap kept between the character shape and obstacles
    pub const OFFSET: f32 = 0.01;

    /// Character controller autostep max height
    pub const AUTOSTEP_MAX_HEIGHT: f32 = 0.25;

    /// Character controller autostep min width
    pub const AUTOSTEP_MIN_WIDTH: f32 = 0.1;

    /// Character controller snap to ground distance
    pub const SNAP_TO_GROUND: f32 = 0.2;

    /// Steepest climbable surface, degrees from horizontal
    pub const MAX_SLOPE_CLIMB_DEG: f32 = 45.0;

    /// Surfaces flatter than this never make a standing character slide
    pub const MIN_SLOPE_SLIDE_DEG: f32 = 30.0;

    /// normal·up above this marks a ground contact (surfaces up to about 45.6 degrees).
    /// Slightly wider than `MAX_SLOPE_CLIMB_DEG`: a surface between 45 and 45.6
    /// degrees holds a standing character as ground but cannot be walked up.
    pub const GROUND_NORMAL_THRESHOLD: f32 = 0.7;

    /// Character capsule radius
    pub const CHARACTER_RADIUS: f32 = 0.4;

    /// Half length of the capsule's straight segment
    pub const CHARACTER_HALF_HEIGHT: f32 = 0.5;
}

/// Movement state machine defaults
pub mod movement {
    /// Horizontal top speed (m/s)
    pub const MAX_SPEED: f32 = 8.0;

    /// Rate toward the target speed while input is held (m/s²)
    pub const ACCELERATION: f32 = 60.0;

    /// Rate back to rest once input is released (m/s²)
    pub const DECELERATION: f32 = 90.0;

    /// Scale on both rates while airborne
    pub const AIR_CONTROL: f32 = 0.8;

    /// Character gravity (m/s²)
    pub const GRAVITY: f32 = 40.0;

    /// Terminal fall speed (m/s, positive magnitude)
    pub const TERMINAL_FALL_SPEED: f32 = 25.0;

    /// Vertical launch speed for the first, second and third jump
    pub const JUMP_IMPULSES: [f32; 3] = [12.0, 14.0, 16.0];

    /// Coyote window after leaving ground (seconds)
    pub const COYOTE_TIME: f32 = 0.1;

    /// Window a jump request waits for ground (seconds)
    pub const JUMP_BUFFER_TIME: f32 = 0.12;

    /// Horizontal speed separating idle from running
    pub const RUN_THRESHOLD: f32 = 0.1;

    /// Downward probe added each grounded tick so support stays in the contact set
    pub const GROUND_STICK_DISTANCE: f32 = 0.02;

    /// Slack on the coyote and buffer window edges for accumulated float error
    pub const WINDOW_EPSILON: f32 = 1.0e-4;
}
