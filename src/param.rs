//! Automatable Parameters
//!
//! An [`AudioParam`] holds a base value plus a time-ordered list of
//! automation events on the context clock. Scheduled events take effect at
//! their absolute time; a linear ramp interpolates from the previous event
//! (or the value the parameter held when it was last advanced) to its own
//! target value. A target event starts an exponential approach toward its
//! value that lasts until the next event.
//!
//! Signals connected into a parameter are summed on top of the automation
//! value by the context; this module only knows about the timeline.

use serde::Serialize;

/// A scheduled change on a parameter timeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum AutomationEvent {
    /// Jump to `value` at `time`
    SetValue { time: f64, value: f64 },
    /// Reach `value` at `time`, moving linearly from the previous event
    LinearRamp { time: f64, value: f64 },
    /// From `time` on, approach `value` exponentially with `time_constant`
    SetTarget {
        time: f64,
        value: f64,
        time_constant: f64,
    },
}

impl AutomationEvent {
    pub fn time(&self) -> f64 {
        match *self {
            AutomationEvent::SetValue { time, .. }
            | AutomationEvent::LinearRamp { time, .. }
            | AutomationEvent::SetTarget { time, .. } => time,
        }
    }

    pub fn value(&self) -> f64 {
        match *self {
            AutomationEvent::SetValue { value, .. }
            | AutomationEvent::LinearRamp { value, .. }
            | AutomationEvent::SetTarget { value, .. } => value,
        }
    }
}

/// A parameter with an automation timeline
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParam {
    default: f64,
    /// Value in effect at `anchor_time`, before any pending event
    anchor_value: f64,
    anchor_time: f64,
    /// Exponential approach `(target, time_constant)` running from the anchor
    anchor_approach: Option<(f64, f64)>,
    /// Last value produced by `advance`
    current: f64,
    events: Vec<AutomationEvent>,
}

impl AudioParam {
    pub fn new(default: f64) -> Self {
        Self {
            default,
            anchor_value: default,
            anchor_time: 0.0,
            anchor_approach: None,
            current: default,
            events: Vec::new(),
        }
    }

    pub fn default_value(&self) -> f64 {
        self.default
    }

    /// Value as of the last render step
    pub fn value(&self) -> f64 {
        self.current
    }

    /// Set the base value immediately. Pending events stay scheduled.
    pub fn set_value(&mut self, value: f64) {
        self.anchor_value = value;
        self.anchor_approach = None;
        self.current = value;
    }

    pub fn set_value_at_time(&mut self, value: f64, time: f64) {
        self.insert(AutomationEvent::SetValue { time, value });
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f64, time: f64) {
        self.insert(AutomationEvent::LinearRamp { time, value });
    }

    /// Start approaching `value` at `time`; after one `time_constant` about
    /// 63% of the distance is covered. A non-positive constant jumps.
    pub fn set_target_at_time(&mut self, value: f64, time: f64, time_constant: f64) {
        if time_constant > 0.0 {
            self.insert(AutomationEvent::SetTarget {
                time,
                value,
                time_constant,
            });
        } else {
            self.set_value_at_time(value, time);
        }
    }

    /// Drop every event scheduled at or after `time`
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|e| e.time() < time);
    }

    /// Drop every pending event, holding the current value
    pub fn cancel_all(&mut self) {
        self.events.clear();
        self.anchor_value = self.current;
        self.anchor_approach = None;
    }

    pub fn scheduled_events(&self) -> &[AutomationEvent] {
        &self.events
    }

    pub fn has_scheduled_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Evaluate the timeline at `time` without consuming events
    pub fn value_at(&self, time: f64) -> f64 {
        let mut prev_time = self.anchor_time;
        let mut prev_value = self.anchor_value;
        let mut approach = self.anchor_approach;
        for event in &self.events {
            match *event {
                AutomationEvent::SetValue { time: t, value } => {
                    if t > time {
                        break;
                    }
                    prev_time = t;
                    prev_value = value;
                    approach = None;
                }
                AutomationEvent::LinearRamp { time: t, value } => {
                    if t <= time {
                        prev_time = t;
                        prev_value = value;
                        approach = None;
                        continue;
                    }
                    let span = t - prev_time;
                    if span <= 0.0 {
                        return value;
                    }
                    let frac = ((time - prev_time) / span).clamp(0.0, 1.0);
                    return prev_value + (value - prev_value) * frac;
                }
                AutomationEvent::SetTarget {
                    time: t,
                    value,
                    time_constant,
                } => {
                    if t > time {
                        break;
                    }
                    prev_value = approached(prev_value, approach, t - prev_time);
                    prev_time = t;
                    approach = Some((value, time_constant));
                }
            }
        }
        approached(prev_value, approach, time - prev_time)
    }

    /// Evaluate at `time` and discard events that are now in the past
    pub fn advance(&mut self, time: f64) -> f64 {
        let value = self.value_at(time);
        let elapsed = self.events.partition_point(|e| e.time() <= time);
        if elapsed > 0 {
            let last = self.events[elapsed - 1];
            self.anchor_value = self.value_at(last.time());
            self.anchor_time = last.time();
            self.anchor_approach = match last {
                AutomationEvent::SetTarget {
                    value,
                    time_constant,
                    ..
                } => Some((value, time_constant)),
                _ => None,
            };
            self.events.drain(..elapsed);
        }
        self.current = value;
        value
    }

    /// Forget all automation and return to the default value
    pub fn reset(&mut self) {
        self.events.clear();
        self.anchor_time = 0.0;
        self.anchor_value = self.default;
        self.anchor_approach = None;
        self.current = self.default;
    }

    fn insert(&mut self, event: AutomationEvent) {
        let time = event.time();
        if !time.is_finite() || !event.value().is_finite() {
            return;
        }
        // Events at equal times keep their scheduling order
        let at = self.events.partition_point(|e| e.time() <= time);
        self.events.insert(at, event);
    }
}

/// Value of an exponential approach `elapsed` seconds after it left `from`
fn approached(from: f64, approach: Option<(f64, f64)>, elapsed: f64) -> f64 {
    match approach {
        Some((target, time_constant)) => {
            target + (from - target) * (-elapsed.max(0.0) / time_constant).exp()
        }
        None => from,
    }
}
