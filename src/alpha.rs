//! Alpha-ejection correction after Ketcham et al. (2011).

/// Fraction of He retained at each node after alpha ejection.
///
/// Nodes deeper than one stopping distance below the surface keep everything.
/// Nodes inside the ejection zone keep the part of a sphere of radius
/// `stopping_distance` around them that stays inside the grain, using the
/// intersection plane of the two spheres.
pub fn retained_fractions(node_positions: &[f64], stopping_distance: f64, radius: f64) -> Vec<f64> {
    node_positions
        .iter()
        .map(|&r| retained_fraction(r, stopping_distance, radius))
        .collect()
}

fn retained_fraction(r: f64, stopping_distance: f64, radius: f64) -> f64 {
    if stopping_distance <= 0.0 || r < radius - stopping_distance {
        return 1.0;
    }
    let intersection_plane =
        (r * r + radius * radius - stopping_distance * stopping_distance) / (2.0 * r);
    let fraction = 0.5 + (intersection_plane - r) / (2.0 * stopping_distance);
    fraction.clamp(0.0, 1.0)
}

/// Scalar alpha correction factor (tau) for a sphere:
/// `1 - 0.25 * S * d / V`, i.e. `1 - 3d / (4R)`.
pub fn alpha_correction(stopping_distance: f64, radius: f64) -> f64 {
    let volume = (4.0 / 3.0) * std::f64::consts::PI * radius.powi(3);
    let surface_area = 4.0 * std::f64::consts::PI * radius.powi(2);
    1.0 - 0.25 * (surface_area * stopping_distance) / volume
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn nodes(radius: f64, n: usize) -> Vec<f64> {
        let h = radius / n as f64;
        (0..n).map(|j| (j as f64 + 0.5) * h).collect()
    }

    #[test]
    fn zero_stopping_distance_retains_everything() {
        let r = nodes(100.0, 129);
        assert!(retained_fractions(&r, 0.0, 100.0).iter().all(|&f| f == 1.0));
    }

    #[test]
    fn fraction_decreases_toward_surface() {
        let radius = 100.0;
        let d = 18.81;
        let r = nodes(radius, 513);
        let f = retained_fractions(&r, d, radius);

        for (j, &rj) in r.iter().enumerate() {
            assert!((0.0..=1.0).contains(&f[j]));
            if rj < radius - d {
                assert_eq!(f[j], 1.0);
            }
        }
        let zone: Vec<f64> = r
            .iter()
            .zip(&f)
            .filter(|(&rj, _)| rj >= radius - d)
            .map(|(_, &fj)| fj)
            .collect();
        assert!(zone.len() > 10);
        for w in zone.windows(2) {
            assert!(w[1] < w[0], "retained fraction must strictly decrease: {} -> {}", w[0], w[1]);
        }
        // Half the alpha range leaves the grain right at the surface.
        assert_abs_diff_eq!(*zone.last().unwrap(), 0.5 - d / (4.0 * radius), epsilon = 0.01);
    }

    #[test]
    fn longer_stopping_distance_ejects_more() {
        let radius = 100.0;
        let r = nodes(radius, 129);
        let short = retained_fractions(&r, 10.0, radius);
        let long = retained_fractions(&r, 20.0, radius);
        for j in 0..r.len() {
            assert!(long[j] <= short[j]);
        }
        assert!(long.last().unwrap() < short.last().unwrap());
    }

    #[test]
    fn continuous_at_edge_of_ejection_zone() {
        let radius = 50.0;
        let d = 15.0;
        let just_inside = retained_fraction(radius - d + 1e-9, d, radius);
        assert_abs_diff_eq!(just_inside, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn tau_matches_sphere_formula() {
        assert_abs_diff_eq!(alpha_correction(18.81, 100.0), 1.0 - 0.75 * 0.1881, epsilon = 1e-12);
        assert_eq!(alpha_correction(0.0, 100.0), 1.0);
    }
}
