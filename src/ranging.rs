//! Distance estimation from signal strength.

/// Path loss between the calibrated 0 m tx power a beacon advertises and the 1 m reference the curve was fitted to.
const CALIBRATION_DBM: f64 = 41.0;

/// Estimates the distance in metres to a beacon.
///
/// `tx_power` is the calibrated power at 0 m from the beacon's frame and `rssi` the received signal strength, both in
/// dBm. Returns `None` if either is unknown or zero, or if `rssi` is not negative.
///
/// ```
/// # use eddystone_ble::ranging::calculate_accuracy;
/// assert_eq!(calculate_accuracy(Some(-20), Some(-61)), Some(1.0 * 0.89976 + 0.111));
/// assert_eq!(calculate_accuracy(Some(-20), Some(0)), None);
/// ```
pub fn calculate_accuracy(tx_power: Option<i8>, rssi: Option<i16>) -> Option<f64> {
    let rssi = rssi.filter(|&rssi| rssi < 0)?;
    let tx_power = tx_power.filter(|&tx_power| tx_power != 0)?;

    let ratio = f64::from(rssi) / (f64::from(tx_power) - CALIBRATION_DBM);
    if ratio < 1.0 {
        Some(ratio.powi(10))
    } else {
        Some(0.89976 * ratio.powf(7.7095) + 0.111)
    }
}

/// An exponential low-pass filter for smoothing noisy RSSI or distance readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowPassFilter {
    cut_off: f64,
    state: f64,
}

impl Default for LowPassFilter {
    fn default() -> Self {
        LowPassFilter::new(0.8, 0.0)
    }
}

impl LowPassFilter {
    /// Creates a filter.
    ///
    /// `cut_off` is the weight given to the previous state on each update, between 0 and 1.
    pub fn new(cut_off: f64, state: f64) -> Self {
        LowPassFilter { cut_off, state }
    }

    /// Feeds a new reading into the filter and returns the filtered value.
    pub fn filter(&mut self, value: f64) -> f64 {
        self.state = value * (1.0 - self.cut_off) + self.state * self.cut_off;
        self.state
    }

    /// The current filtered value
    pub fn value(&self) -> f64 {
        self.state
    }
}
