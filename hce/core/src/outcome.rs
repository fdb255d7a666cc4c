use std::fmt;

use num_format::{Locale, ToFormattedString};
use serde::{Serialize, Serializer};

/// Outcome of checking the certificate of one domain name
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Remaining days to the expiration date, truncated toward zero
    Days(i64),
    /// Description of whatever went wrong while checking
    Failed(String),
}

impl ProbeOutcome {
    /// Failure from anything that can be displayed
    ///
    /// ```
    /// use hce::ProbeOutcome;
    /// let outcome = ProbeOutcome::failed("connection refused");
    /// assert_eq!("connection refused", outcome.to_string());
    /// ```
    pub fn failed<E>(e: E) -> Self
    where
        E: fmt::Display,
    {
        ProbeOutcome::Failed(e.to_string())
    }

    /// Remaining days, if the check succeeded
    pub fn days(&self) -> Option<i64> {
        match self {
            ProbeOutcome::Days(days) => Some(*days),
            ProbeOutcome::Failed(_) => None,
        }
    }

    /// Human-readable sentence of the outcome
    ///
    /// ```
    /// use hce::ProbeOutcome;
    /// let outcome = ProbeOutcome::Days(1024);
    /// assert_eq!(
    ///     "certificate of example.com expires in 1,024 days",
    ///     outcome.sentence("example.com")
    /// );
    /// ```
    pub fn sentence(&self, domain_name: &str) -> String {
        match self {
            ProbeOutcome::Days(days) if *days < 0 => {
                format!("certificate of {domain_name} has expired")
            }
            ProbeOutcome::Days(days) => {
                let days = days.to_formatted_string(&Locale::en);
                format!("certificate of {domain_name} expires in {days} days")
            }
            ProbeOutcome::Failed(e) => format!("failed to check {domain_name}: {e}"),
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Days(days) => write!(f, "{days}"),
            ProbeOutcome::Failed(e) => write!(f, "{e}"),
        }
    }
}

// plain strings on the wire, days and errors share the same slot
impl Serialize for ProbeOutcome {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
