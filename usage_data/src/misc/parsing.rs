pub mod duration {
    use std::{ops::Deref, str::FromStr};

    use chrono::Duration;
    use color_eyre::{
        eyre::{bail, eyre, Context as _},
        Result,
    };
    use serde::Deserialize;

    /// Slurm elapsed time, `HH:MM:SS` or `D-HH:MM:SS`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
    #[serde(try_from = "String")]
    pub struct SlurmDuration(pub Duration);

    impl FromStr for SlurmDuration {
        type Err = color_eyre::Report;

        fn from_str(value: &str) -> Result<Self, Self::Err> {
            let value = value.trim();
            let (days, clock) = match value.split_once('-') {
                Some((days, clock)) => (
                    days.parse::<i64>().wrap_err_with(|| format!("parsing days of {value:?}"))?,
                    clock,
                ),
                None => (0, value),
            };
            let fields = clock
                .split(':')
                .map(|field| field.parse::<i64>().wrap_err_with(|| format!("parsing {field:?} of {value:?}")))
                .collect::<Result<Vec<_>>>()?;
            let (hours, minutes, seconds) = match fields.as_slice() {
                &[hours, minutes, seconds] => (hours, minutes, seconds),
                _ => bail!("parsing duration: {value:?}: expected [D-]HH:MM:SS"),
            };
            if days < 0 || hours < 0 || minutes < 0 || seconds < 0 {
                bail!("parsing duration: {value:?}: negative component");
            }
            let total = days
                .checked_mul(24)
                .and_then(|h| h.checked_add(hours))
                .and_then(|h| h.checked_mul(60))
                .and_then(|m| m.checked_add(minutes))
                .and_then(|m| m.checked_mul(60))
                .and_then(|s| s.checked_add(seconds))
                .ok_or_else(|| eyre!("parsing duration: {value:?} overflows"))?;
            Ok(SlurmDuration(
                Duration::try_seconds(total).ok_or_else(|| eyre!("{value:?} is out of range for a duration"))?,
            ))
        }
    }

    impl TryFrom<String> for SlurmDuration {
        type Error = color_eyre::Report;

        fn try_from(value: String) -> Result<Self, Self::Error> {
            value.parse()
        }
    }

    impl SlurmDuration {
        pub fn as_hours(&self) -> f64 {
            self.0.num_seconds() as f64 / 3600f64
        }
    }

    impl Deref for SlurmDuration {
        type Target = Duration;

        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }
}

pub mod datetime {
    use chrono::{NaiveDate, NaiveDateTime};

    pub const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
    ];

    /// ISO 8601 without timezone, with `T` or a space as separator, or a bare date.
    ///
    /// Slurm prints local times, so everything stays naive.
    pub fn parse_iso(input: &str) -> Option<NaiveDateTime> {
        let input = input.trim();
        FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
            .or_else(|| NaiveDate::parse_from_str(input, "%Y-%m-%d").ok().and_then(|date| date.and_hms_opt(0, 0, 0)))
    }
}

pub use duration::SlurmDuration;
