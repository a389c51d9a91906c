//! Eye aspect ratio (EAR) from six eye-contour landmarks.
//!
//! Points are ordered outer corner, two upper-lid points, inner corner,
//! two lower-lid points, so that `p1`/`p5` and `p2`/`p4` are vertical pairs
//! and `p0`/`p3` spans the eye horizontally:
//!
//! ```text
//! EAR = (|p1 - p5| + |p2 - p4|) / (2 * |p0 - p3|)
//! ```
//!
//! An open eye sits around 0.25–0.35; a closed eye drops towards zero.

use crate::types::Point;

/// Value returned for input the ratio cannot be computed from. Sits above
/// the default blink threshold so a bad frame reads as "eye open" and never
/// advances the blink automaton.
pub const NEUTRAL_EAR: f32 = 0.35;

/// Horizontal spans below this are treated as degenerate.
const MIN_HORIZONTAL_DISTANCE: f32 = 1e-7;

/// Compute the eye aspect ratio for one eye.
///
/// Malformed input policy: wrong arity, non-finite coordinates or a
/// degenerate horizontal span all yield [`NEUTRAL_EAR`] instead of an error.
pub fn calculate_ear(eye: &[Point]) -> f32 {
    let [p0, p1, p2, p3, p4, p5] = eye else {
        return NEUTRAL_EAR;
    };
    if eye.iter().any(|p| !p.is_finite()) {
        return NEUTRAL_EAR;
    }

    let vertical_a = p1.distance(p5);
    let vertical_b = p2.distance(p4);
    let horizontal = p0.distance(p3);
    if horizontal < MIN_HORIZONTAL_DISTANCE {
        return NEUTRAL_EAR;
    }

    let ear = (vertical_a + vertical_b) / (2.0 * horizontal);
    if ear.is_finite() {
        ear
    } else {
        NEUTRAL_EAR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Eye of width 30 px with lids `gap` px apart.
    fn eye(gap: f32) -> Vec<Point> {
        let half = gap / 2.0;
        vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, -half),
            Point::new(20.0, -half),
            Point::new(30.0, 0.0),
            Point::new(20.0, half),
            Point::new(10.0, half),
        ]
    }

    #[test]
    fn test_open_eye_ratio() {
        // (9 + 9) / (2 * 30) = 0.3
        let ear = calculate_ear(&eye(9.0));
        assert!((ear - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_closed_eye_ratio_is_zero() {
        assert_eq!(calculate_ear(&eye(0.0)), 0.0);
    }

    #[test]
    fn test_degenerate_horizontal_returns_neutral() {
        let points = vec![Point::new(5.0, 5.0); 6];
        assert_eq!(calculate_ear(&points), NEUTRAL_EAR);

        let mut nearly = eye(4.0);
        nearly[3] = Point::new(nearly[0].x + 5e-8, nearly[0].y);
        assert_eq!(calculate_ear(&nearly), NEUTRAL_EAR);
    }

    #[test]
    fn test_wrong_arity_returns_neutral() {
        assert_eq!(calculate_ear(&[]), NEUTRAL_EAR);
        assert_eq!(calculate_ear(&eye(9.0)[..5]), NEUTRAL_EAR);

        let mut seven = eye(9.0);
        seven.push(Point::new(1.0, 1.0));
        assert_eq!(calculate_ear(&seven), NEUTRAL_EAR);
    }

    #[test]
    fn test_non_finite_returns_neutral() {
        let mut points = eye(9.0);
        points[2] = Point::new(f32::NAN, 0.0);
        assert_eq!(calculate_ear(&points), NEUTRAL_EAR);

        points[2] = Point::new(0.0, f32::INFINITY);
        assert_eq!(calculate_ear(&points), NEUTRAL_EAR);
    }
}
