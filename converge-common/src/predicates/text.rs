//! Substring checks, mostly for scanning logs for markers like `panic:`.

use super::Predicate;
use crate::poll::Decision;

/// Satisfied iff the text contains at least one of the given needles.
/// An empty needle list never satisfies.
#[derive(Debug, Clone)]
pub struct ContainsAny {
    needles: Vec<String>,
}

impl ContainsAny {
    pub fn new<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            needles: needles.into_iter().map(Into::into).collect(),
        }
    }

    /// First needle found in `text`, in declaration order.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        self.needles
            .iter()
            .find(|n| !n.is_empty() && text.contains(n.as_str()))
            .map(String::as_str)
    }
}

impl Predicate<str> for ContainsAny {
    fn decide(&self, text: &str) -> Decision {
        if self.first_match(text).is_some() {
            Decision::Satisfied
        } else {
            Decision::NotYet
        }
    }
}

impl Predicate<String> for ContainsAny {
    fn decide(&self, text: &String) -> Decision {
        Predicate::<str>::decide(self, text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_reason_matching() {
        let predicate = ContainsAny::new(["WebhookServiceNotFound", "WebhookServiceNotReady"]);
        let status = "ValidatingAdmissionWebhookConfigurationError=True reason=WebhookServiceNotReady";
        assert_eq!(predicate.first_match(status), Some("WebhookServiceNotReady"));
        assert_eq!(Predicate::<str>::decide(&predicate, status), Decision::Satisfied);
        assert_eq!(
            Predicate::<str>::decide(&predicate, "AdmissionWebhookMatchesCorrectly"),
            Decision::NotYet
        );
    }

    #[test]
    fn test_empty_needles_never_satisfy() {
        let none = ContainsAny::new(Vec::<String>::new());
        assert_eq!(Predicate::<str>::decide(&none, "anything"), Decision::NotYet);
        let blank = ContainsAny::new([""]);
        assert_eq!(Predicate::<str>::decide(&blank, "anything"), Decision::NotYet);
    }
}
