// bot/src/utils/math.rs
// Арифметика порогов: отклонение котировки и перенос порога на следующую ногу

use std::fmt;

/// Знаменатель порога: цель прибыли хранится в миллионных долях процента,
/// поэтому `in * (100 + g) / 100` = `in * gain_factor / THRESHOLD_SCALE`
const THRESHOLD_SCALE: u128 = 100_000_000;
const GAIN_UNITS_PER_PERCENT: f64 = 1_000_000.0;

/// Порог в базовых единицах выходного токена, точная дробь `scaled / THRESHOLD_SCALE`.
/// Сравнение с котировкой идёт в u128, f64 остаётся только для логов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PriceThreshold {
    scaled: u128,
}

impl PriceThreshold {
    /// Порог из целого числа базовых единиц (стартовый порог записи)
    pub fn from_amount(amount: u64) -> Self {
        Self {
            scaled: amount as u128 * THRESHOLD_SCALE,
        }
    }

    /// Порог для следующей ноги: вернуть как минимум вход прошлой ноги плюс целевую прибыль
    ///
    /// # Формула
    /// threshold = in_amount * (1 + target_gain_percentage / 100)
    pub fn after_leg(in_amount: u64, target_gain_percentage: f64) -> Self {
        let gain_units = (target_gain_percentage.max(0.0) * GAIN_UNITS_PER_PERCENT).round() as u128;
        let factor = THRESHOLD_SCALE.saturating_add(gain_units);
        Self {
            scaled: (in_amount as u128).saturating_mul(factor),
        }
    }

    /// Строгая проверка: равенство порогу сделку не запускает
    pub fn is_exceeded_by(&self, out_amount: u64) -> bool {
        out_amount as u128 * THRESHOLD_SCALE > self.scaled
    }

    pub fn as_f64(&self) -> f64 {
        self.scaled as f64 / THRESHOLD_SCALE as f64
    }
}

impl fmt::Display for PriceThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.scaled / THRESHOLD_SCALE;
        let fraction = self.scaled % THRESHOLD_SCALE;
        if fraction == 0 {
            write!(f, "{}", whole)
        } else {
            write!(f, "{}.{:08}", whole, fraction)
        }
    }
}

/// Относительное отклонение котировки от порога, только для логов
///
/// # Формула
/// delta = (out_amount - threshold) / threshold
///
/// Для нулевого порога возвращает 0.0: такой порог отсекается
/// валидацией конфигурации и сюда попасть не должен.
pub fn relative_delta(out_amount: u64, threshold: PriceThreshold) -> f64 {
    let threshold = threshold.as_f64();
    if threshold <= 0.0 {
        return 0.0;
    }
    (out_amount as f64 - threshold) / threshold
}
