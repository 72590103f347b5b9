use crate::config::RecommendationConfig;
use anyhow::{anyhow, Result};

const MAX_USERNAME_LENGTH: usize = 64;

/// Why a single rating value is unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingValueError {
    NotFinite,
    OutOfRange,
}

pub fn check_rating_value(value: f64, config: &RecommendationConfig) -> Result<f64, RatingValueError> {
    if !value.is_finite() {
        return Err(RatingValueError::NotFinite);
    }
    if value < config.rating_min || value > config.rating_max {
        return Err(RatingValueError::OutOfRange);
    }
    Ok(value)
}

pub fn validate_rating_value(value: f64, config: &RecommendationConfig) -> Result<f64> {
    check_rating_value(value, config).map_err(|e| match e {
        RatingValueError::NotFinite => anyhow!("Rating value must be a finite number"),
        RatingValueError::OutOfRange => anyhow!(
            "Rating value {} outside allowed range {}..={}",
            value,
            config.rating_min,
            config.rating_max
        ),
    })
}

pub fn validate_k(k: usize, config: &RecommendationConfig) -> Result<usize> {
    if k == 0 {
        return Err(anyhow!("Number of recommendations must be greater than 0"));
    }

    if k > config.max_k {
        return Err(anyhow!(
            "Number of recommendations too large: {} (max {})",
            k,
            config.max_k
        ));
    }

    Ok(k)
}

pub fn validate_username(username: &str) -> Result<&str> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Username cannot be empty"));
    }

    if trimmed.chars().count() > MAX_USERNAME_LENGTH {
        return Err(anyhow!("Username too long (max {} characters)", MAX_USERNAME_LENGTH));
    }

    if trimmed.chars().any(char::is_control) {
        return Err(anyhow!("Username contains control characters"));
    }

    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_value_bounds() {
        let config = RecommendationConfig::default();
        assert_eq!(check_rating_value(4.0, &config), Ok(4.0));
        assert_eq!(check_rating_value(0.5, &config), Ok(0.5));
        assert_eq!(check_rating_value(0.0, &config), Err(RatingValueError::OutOfRange));
        assert_eq!(check_rating_value(5.5, &config), Err(RatingValueError::OutOfRange));
        assert_eq!(check_rating_value(f64::NAN, &config), Err(RatingValueError::NotFinite));
        assert!(validate_rating_value(9.0, &config).is_err());
    }

    #[test]
    fn test_validate_k() {
        let config = RecommendationConfig::default();
        assert!(validate_k(0, &config).is_err());
        assert!(validate_k(10, &config).is_ok());
        assert!(validate_k(config.max_k + 1, &config).is_err());
    }

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username("  alice ").unwrap(), "alice");
        assert!(validate_username("   ").is_err());
        assert!(validate_username(&"x".repeat(65)).is_err());
        assert!(validate_username("bad\nname").is_err());
    }
}
