use bytemuck::{Pod, Zeroable};

/// Direction of the fade currently encoded in an effect's push constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum TransitionType {
    #[default]
    In = 0,
    Out = 1,
}

/// Leading block of every configurable effect's push constants.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct TransitionHeader {
    pub transition_type: u32,
    pub begin_time: f32,
    pub duration: f32,
}

pub const TRANSITION_HEADER_SIZE: usize = std::mem::size_of::<TransitionHeader>();

/// Fade-in/fade-out bookkeeping for an effect with an on/off intent.
///
/// Timers restart only when the requested state flips, so calling
/// [`TransitionState::setup`] every frame with the same intent is stable.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransitionState {
    active: bool,
    kind: TransitionType,
    begin_time: f32,
    duration: f32,
}

impl TransitionState {
    /// Records the requested state for this frame and reports whether the
    /// effect should be drawn. A fading-out effect stays visible until
    /// `now - begin_time` exceeds the fade-out duration.
    pub fn setup(&mut self, active: bool, now: f32, duration_in: f32, duration_out: f32) -> bool {
        let was_active = self.active;
        self.active = active;

        if !was_active && active {
            self.kind = TransitionType::In;
            self.begin_time = now;
            self.duration = duration_in;
        } else if was_active && !active {
            self.kind = TransitionType::Out;
            self.begin_time = now;
            self.duration = duration_out;
        }

        self.is_visible(now)
    }

    /// Deactivates without starting a fade-out.
    pub fn setup_null(&mut self) -> bool {
        self.active = false;
        false
    }

    pub fn is_visible(&self, now: f32) -> bool {
        self.active
            || (self.kind == TransitionType::Out && now - self.begin_time <= self.duration)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn kind(&self) -> TransitionType {
        self.kind
    }

    pub fn begin_time(&self) -> f32 {
        self.begin_time
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn header(&self) -> TransitionHeader {
        TransitionHeader {
            transition_type: self.kind as u32,
            begin_time: self.begin_time,
            duration: self.duration,
        }
    }
}
