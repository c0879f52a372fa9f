use alloy_primitives::U256;

pub fn now_ts() -> f64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs_f64()
}

pub fn round_to_precision(x: f64, places: u32) -> f64 {
    let scale = 10f64.powi(places as i32);
    (x * scale).round() / scale
}

/// Fixed-point integer to human units (`raw / 10^decimals`).
///
/// Goes through the decimal string so values above 2^53 keep their leading
/// digits instead of being truncated by an integer cast.
pub fn units_to_decimal(raw: U256, decimals: u8) -> f64 {
    let s = if decimals == 0 {
        raw.to_string()
    } else {
        let scale = U256::from(10u64).pow(U256::from(decimals));
        format!(
            "{}.{:0>width$}",
            raw / scale,
            (raw % scale).to_string(),
            width = decimals as usize
        )
    };
    s.parse::<f64>().unwrap_or(f64::NAN)
}
