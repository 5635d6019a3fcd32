//! Boundary behavior: what happens when a sample falls outside a slot's
//! configured bounds.
//!
//! The policy space is a closed, simple sum type (`Pass`/`Clamp`/`Wrap`/
//! `Drop` per bound edge), so it is implemented directly here rather than as
//! a generic trait parameter on [`crate::router::Router`] -- there is no
//! plausible alternative boundary algebra a caller would want to swap in.

use crate::history::HistoryRing;

/// What to do when a value crosses one edge of its bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryAction {
    /// No bound configured on this edge; value always passes.
    #[default]
    None,
    /// Clamp the value to the bound.
    Clamp,
    /// Wrap the value back into range (modular).
    Wrap,
    /// Drop the sample entirely.
    Drop,
}

/// Min/max bounds and the action to take when each is crossed.
#[derive(Debug, Clone, Default)]
pub struct Bounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub action_min: BoundaryAction,
    pub action_max: BoundaryAction,
}

impl Bounds {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn clamp(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            action_min: BoundaryAction::Clamp,
            action_max: BoundaryAction::Clamp,
        }
    }

    pub fn drop_outside(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            action_min: BoundaryAction::Drop,
            action_max: BoundaryAction::Drop,
        }
    }
}

/// Apply `bounds` element-wise to the sample most recently pushed onto
/// `history`, mutating it in place. Returns `true` if the sample should be
/// dropped (caller must then roll the history position back).
pub fn apply_boundary(history: &mut HistoryRing, bounds: &Bounds) -> bool {
    if bounds.min.is_none() && bounds.max.is_none() {
        return false;
    }
    let length = history.length();
    let position = history.position();
    if position < 0 {
        return false;
    }
    // Work on a scratch copy since HistoryRing exposes its storage as a
    // contiguous slice only through `latest()`.
    let (slice, _) = history.latest().expect("just pushed");
    let mut scratch: Vec<f64> = slice.to_vec();
    debug_assert_eq!(scratch.len(), length);

    for v in scratch.iter_mut() {
        if let Some(max) = bounds.max {
            if *v > max {
                match bounds.action_max {
                    BoundaryAction::None => {}
                    BoundaryAction::Clamp => *v = max,
                    BoundaryAction::Wrap => {
                        if let Some(min) = bounds.min {
                            let range = max - min;
                            if range > 0.0 {
                                *v = min + (*v - min).rem_euclid(range);
                            }
                        }
                    }
                    BoundaryAction::Drop => return true,
                }
            }
        }
        if let Some(min) = bounds.min {
            if *v < min {
                match bounds.action_min {
                    BoundaryAction::None => {}
                    BoundaryAction::Clamp => *v = min,
                    BoundaryAction::Wrap => {
                        if let Some(max) = bounds.max {
                            let range = max - min;
                            if range > 0.0 {
                                *v = min + (*v - min).rem_euclid(range);
                            }
                        }
                    }
                    BoundaryAction::Drop => return true,
                }
            }
        }
    }

    history.overwrite_latest(&scratch);
    false
}
