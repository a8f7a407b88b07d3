//! Psychrometric functions (SI units)
//!
//! Subset of the ASHRAE Handbook - Fundamentals (2017) formulas used by the
//! built-in calculators. Temperatures are °C, pressures Pa, relative humidity
//! is a ratio in [0, 1] and humidity ratios are kg water / kg dry air.
//!
//! All functions are pure; out-of-range inputs return `PsychroError`.

/// Zero degree Celsius expressed as Kelvin
const ZERO_CELSIUS_AS_KELVIN: f64 = 273.15;

/// Gas constant for dry air in J kg⁻¹ K⁻¹
const R_DA_SI: f64 = 287.042;

/// Lower bound for any humidity ratio used or returned
const MIN_HUM_RATIO: f64 = 1e-7;

/// Freezing point of water in °C
const FREEZING_POINT_WATER_SI: f64 = 0.0;

/// Triple point of water in °C
const TRIPLE_POINT_WATER_SI: f64 = 0.01;

/// Convergence tolerance for iterative solvers (°C)
const TOLERANCE: f64 = 0.001;

/// Iteration cap for iterative solvers
const MAX_ITER_COUNT: usize = 100;

/// Validity range of the saturation vapour pressure correlation (°C)
const DEW_POINT_BOUNDS: (f64, f64) = (-100.0, 200.0);

/// Standard atmospheric pressure at sea level in Pa
pub const STANDARD_PRESSURE_PA: f64 = 101_325.0;

#[derive(Debug, Clone, PartialEq)]
pub enum PsychroError {
    /// An input is outside its physical range
    OutOfRange(&'static str),
    /// An iterative solver did not converge
    NoConvergence(&'static str),
}

impl std::fmt::Display for PsychroError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PsychroError::OutOfRange(what) => write!(f, "Input out of range: {}", what),
            PsychroError::NoConvergence(what) => write!(f, "Solver did not converge: {}", what),
        }
    }
}

impl std::error::Error for PsychroError {}

pub type PsychroResult = Result<f64, PsychroError>;

fn kelvin(t_celsius: f64) -> f64 {
    t_celsius + ZERO_CELSIUS_AS_KELVIN
}

fn check_rel_hum(rel_hum: f64) -> Result<(), PsychroError> {
    if !(0.0..=1.0).contains(&rel_hum) {
        return Err(PsychroError::OutOfRange("relative humidity outside [0, 1]"));
    }
    Ok(())
}

/// Saturation vapour pressure over water or ice (Pa)
pub fn sat_vap_pres(t_dry_bulb: f64) -> PsychroResult {
    if !(-100.0..=200.0).contains(&t_dry_bulb) {
        return Err(PsychroError::OutOfRange("dry bulb temperature outside [-100, 200] °C"));
    }

    let t = kelvin(t_dry_bulb);
    let ln_pws = if t_dry_bulb <= TRIPLE_POINT_WATER_SI {
        -5.674_535_9e3 / t + 6.392_524_7 - 9.677_843e-3 * t + 6.221_570_1e-7 * t * t
            + 2.074_782_5e-9 * t.powi(3)
            - 9.484_024e-13 * t.powi(4)
            + 4.163_501_9 * t.ln()
    } else {
        -5.800_220_6e3 / t + 1.391_499_3 - 4.864_023_9e-2 * t + 4.176_476_8e-5 * t * t
            - 1.445_209_3e-8 * t.powi(3)
            + 6.545_967_3 * t.ln()
    };
    Ok(ln_pws.exp())
}

/// Derivative of ln(saturation vapour pressure) with respect to temperature
fn d_ln_pws(t_dry_bulb: f64) -> f64 {
    let t = kelvin(t_dry_bulb);
    if t_dry_bulb <= TRIPLE_POINT_WATER_SI {
        5.674_535_9e3 / (t * t) - 9.677_843e-3 + 2.0 * 6.221_570_1e-7 * t
            + 3.0 * 2.074_782_5e-9 * t * t
            - 4.0 * 9.484_024e-13 * t.powi(3)
            + 4.163_501_9 / t
    } else {
        5.800_220_6e3 / (t * t) - 4.864_023_9e-2 + 2.0 * 4.176_476_8e-5 * t
            - 3.0 * 1.445_209_3e-8 * t * t
            + 6.545_967_3 / t
    }
}

/// Partial pressure of water vapour from relative humidity (Pa)
pub fn vap_pres_from_rel_hum(t_dry_bulb: f64, rel_hum: f64) -> PsychroResult {
    check_rel_hum(rel_hum)?;
    Ok(rel_hum * sat_vap_pres(t_dry_bulb)?)
}

/// Dew point temperature from vapour pressure (°C), Newton-Raphson
pub fn t_dew_point_from_vap_pres(t_dry_bulb: f64, vap_pres: f64) -> PsychroResult {
    let (lower, upper) = DEW_POINT_BOUNDS;
    if vap_pres < sat_vap_pres(lower)? || vap_pres > sat_vap_pres(upper)? {
        return Err(PsychroError::OutOfRange("partial pressure of water vapour"));
    }
    if vap_pres <= 0.0 {
        return Err(PsychroError::OutOfRange("partial pressure of water vapour"));
    }

    let ln_vp = vap_pres.ln();
    let mut t_dew_point = t_dry_bulb.clamp(lower, upper);

    for _ in 0..MAX_ITER_COUNT {
        let t_iter = t_dew_point;
        let ln_vp_iter = sat_vap_pres(t_iter)?.ln();
        t_dew_point = (t_iter - (ln_vp_iter - ln_vp) / d_ln_pws(t_iter)).clamp(lower, upper);

        if (t_dew_point - t_iter).abs() <= TOLERANCE {
            return Ok(t_dew_point.min(t_dry_bulb));
        }
    }
    Err(PsychroError::NoConvergence("dew point"))
}

/// Dew point temperature from relative humidity (°C)
pub fn t_dew_point_from_rel_hum(t_dry_bulb: f64, rel_hum: f64) -> PsychroResult {
    let vap_pres = vap_pres_from_rel_hum(t_dry_bulb, rel_hum)?;
    t_dew_point_from_vap_pres(t_dry_bulb, vap_pres)
}

/// Humidity ratio from vapour pressure
pub fn hum_ratio_from_vap_pres(vap_pres: f64, pressure: f64) -> PsychroResult {
    if vap_pres < 0.0 {
        return Err(PsychroError::OutOfRange("partial pressure of water vapour"));
    }
    if pressure <= vap_pres {
        return Err(PsychroError::OutOfRange("atmospheric pressure"));
    }
    Ok((0.621_945 * vap_pres / (pressure - vap_pres)).max(MIN_HUM_RATIO))
}

/// Vapour pressure from humidity ratio (Pa)
pub fn vap_pres_from_hum_ratio(hum_ratio: f64, pressure: f64) -> PsychroResult {
    if hum_ratio < 0.0 {
        return Err(PsychroError::OutOfRange("humidity ratio"));
    }
    let bounded = hum_ratio.max(MIN_HUM_RATIO);
    Ok(pressure * bounded / (0.621_945 + bounded))
}

/// Humidity ratio from relative humidity
pub fn hum_ratio_from_rel_hum(t_dry_bulb: f64, rel_hum: f64, pressure: f64) -> PsychroResult {
    let vap_pres = vap_pres_from_rel_hum(t_dry_bulb, rel_hum)?;
    hum_ratio_from_vap_pres(vap_pres, pressure)
}

/// Humidity ratio of saturated air
pub fn sat_hum_ratio(t_dry_bulb: f64, pressure: f64) -> PsychroResult {
    let sat_vap = sat_vap_pres(t_dry_bulb)?;
    if pressure <= sat_vap {
        return Err(PsychroError::OutOfRange("atmospheric pressure"));
    }
    Ok((0.621_945 * sat_vap / (pressure - sat_vap)).max(MIN_HUM_RATIO))
}

/// Humidity ratio from dry bulb and wet bulb temperatures
pub fn hum_ratio_from_t_wet_bulb(t_dry_bulb: f64, t_wet_bulb: f64, pressure: f64) -> PsychroResult {
    if t_wet_bulb > t_dry_bulb {
        return Err(PsychroError::OutOfRange("wet bulb temperature above dry bulb"));
    }

    let ws_star = sat_hum_ratio(t_wet_bulb, pressure)?;
    let hum_ratio = if t_wet_bulb >= FREEZING_POINT_WATER_SI {
        ((2501.0 - 2.326 * t_wet_bulb) * ws_star - 1.006 * (t_dry_bulb - t_wet_bulb))
            / (2501.0 + 1.86 * t_dry_bulb - 4.186 * t_wet_bulb)
    } else {
        ((2830.0 - 0.24 * t_wet_bulb) * ws_star - 1.006 * (t_dry_bulb - t_wet_bulb))
            / (2830.0 + 1.86 * t_dry_bulb - 2.1 * t_wet_bulb)
    };
    Ok(hum_ratio.max(MIN_HUM_RATIO))
}

/// Dew point temperature from humidity ratio (°C)
pub fn t_dew_point_from_hum_ratio(t_dry_bulb: f64, hum_ratio: f64, pressure: f64) -> PsychroResult {
    let vap_pres = vap_pres_from_hum_ratio(hum_ratio, pressure)?;
    t_dew_point_from_vap_pres(t_dry_bulb, vap_pres)
}

/// Wet bulb temperature from humidity ratio (°C), bisection
pub fn t_wet_bulb_from_hum_ratio(t_dry_bulb: f64, hum_ratio: f64, pressure: f64) -> PsychroResult {
    if hum_ratio < 0.0 {
        return Err(PsychroError::OutOfRange("humidity ratio"));
    }
    let bounded = hum_ratio.max(MIN_HUM_RATIO);

    let t_dew_point = t_dew_point_from_hum_ratio(t_dry_bulb, bounded, pressure)?;

    let mut upper = t_dry_bulb;
    let mut lower = t_dew_point;
    let mut t_wet_bulb = (upper + lower) / 2.0;

    let mut iterations = 0;
    while upper - lower > TOLERANCE {
        let w_star = hum_ratio_from_t_wet_bulb(t_dry_bulb, t_wet_bulb, pressure)?;
        if w_star > bounded {
            upper = t_wet_bulb;
        } else {
            lower = t_wet_bulb;
        }
        t_wet_bulb = (upper + lower) / 2.0;

        iterations += 1;
        if iterations > MAX_ITER_COUNT {
            return Err(PsychroError::NoConvergence("wet bulb"));
        }
    }
    Ok(t_wet_bulb)
}

/// Wet bulb temperature from relative humidity (°C)
pub fn t_wet_bulb_from_rel_hum(t_dry_bulb: f64, rel_hum: f64, pressure: f64) -> PsychroResult {
    let hum_ratio = hum_ratio_from_rel_hum(t_dry_bulb, rel_hum, pressure)?;
    t_wet_bulb_from_hum_ratio(t_dry_bulb, hum_ratio, pressure)
}

/// Specific volume of moist air (m³ per kg dry air)
pub fn moist_air_volume(t_dry_bulb: f64, hum_ratio: f64, pressure: f64) -> PsychroResult {
    if hum_ratio < 0.0 {
        return Err(PsychroError::OutOfRange("humidity ratio"));
    }
    if pressure <= 0.0 {
        return Err(PsychroError::OutOfRange("atmospheric pressure"));
    }
    let bounded = hum_ratio.max(MIN_HUM_RATIO);
    Ok(R_DA_SI * kelvin(t_dry_bulb) * (1.0 + 1.607_858 * bounded) / pressure)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {} ± {}, got {}",
            expected,
            tolerance,
            actual
        );
    }

    #[test]
    fn test_sat_vap_pres() {
        // ASHRAE table values
        assert_close(sat_vap_pres(20.0).unwrap(), 2339.0, 5.0);
        assert_close(sat_vap_pres(-20.0).unwrap(), 103.24, 0.5);
        assert_close(sat_vap_pres(100.0).unwrap(), 101_418.0, 200.0);
    }

    #[test]
    fn test_dew_point() {
        assert_close(t_dew_point_from_rel_hum(25.0, 0.5).unwrap(), 13.86, 0.05);
        assert_close(t_dew_point_from_rel_hum(20.0, 1.0).unwrap(), 20.0, 0.01);
    }

    #[test]
    fn test_dew_point_rejects_bad_humidity() {
        assert!(t_dew_point_from_rel_hum(20.0, 1.5).is_err());
        assert!(t_dew_point_from_rel_hum(20.0, -0.1).is_err());
    }

    #[test]
    fn test_wet_bulb() {
        assert_close(
            t_wet_bulb_from_rel_hum(25.0, 0.5, STANDARD_PRESSURE_PA).unwrap(),
            17.9,
            0.1,
        );
        // Saturated air: wet bulb equals dry bulb
        assert_close(
            t_wet_bulb_from_rel_hum(20.0, 1.0, STANDARD_PRESSURE_PA).unwrap(),
            20.0,
            0.01,
        );
    }

    #[test]
    fn test_hum_ratio() {
        assert_close(
            hum_ratio_from_rel_hum(25.0, 0.5, STANDARD_PRESSURE_PA).unwrap(),
            0.00988,
            0.0001,
        );
    }

    #[test]
    fn test_moist_air_volume() {
        assert_close(
            moist_air_volume(25.0, 0.01, STANDARD_PRESSURE_PA).unwrap(),
            0.8581,
            0.001,
        );
        assert!(moist_air_volume(25.0, 0.01, 0.0).is_err());
    }
}
