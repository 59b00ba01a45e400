use crate::pipeline::Coordinates;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in metres.
pub fn haversine_m(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_for_same_point() {
        let p = Coordinates::new(59.3293, 18.0686);
        assert!(haversine_m(p, p).abs() < 1e-6);
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = haversine_m(Coordinates::new(0.0, 0.0), Coordinates::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 100.0, "got {}", d);
    }

    #[test]
    fn stockholm_to_uppsala() {
        let sthlm = Coordinates::new(59.3293, 18.0686);
        let uppsala = Coordinates::new(59.8586, 17.6389);
        let km = haversine_m(sthlm, uppsala) / 1000.0;
        assert!((60.0..70.0).contains(&km), "got {}", km);
    }
}
