//! Endpoint configuration input and its validation.
//!
//! Raw create and update payloads are checked here before anything reaches
//! storage. Each rejection names the offending field using the same
//! camelCase name the HTTP boundary accepts.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    catalog::EventCatalog,
    error::{CoreError, Result},
    models::EventType,
};

/// Smallest allowed per-attempt timeout.
pub const MIN_TIMEOUT_SECONDS: u32 = 5;
/// Largest allowed per-attempt timeout.
pub const MAX_TIMEOUT_SECONDS: u32 = 120;
/// Timeout used when none is given.
pub const DEFAULT_TIMEOUT_SECONDS: u32 = 30;
/// Largest allowed number of retries after the first attempt.
pub const MAX_RETRY_COUNT: u32 = 5;
/// Retry count used when none is given.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 500;

/// Raw input for registering an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    /// Display name.
    pub name: String,
    /// Optional display description.
    #[serde(default)]
    pub description: Option<String>,
    /// Destination URL.
    pub url: String,
    /// Event types to subscribe to.
    pub event_types: Vec<String>,
    /// Per-attempt timeout, defaults to 30.
    #[serde(default)]
    pub timeout_seconds: Option<u32>,
    /// Retries after the first attempt, defaults to 3.
    #[serde(default)]
    pub retry_count: Option<u32>,
}

/// Raw partial update. Absent fields stay unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointPatch {
    /// New display name.
    #[serde(default)]
    pub name: Option<String>,
    /// New description. An empty or blank string clears it.
    #[serde(default)]
    pub description: Option<String>,
    /// New destination URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Replacement subscription set.
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
    /// New timeout.
    #[serde(default)]
    pub timeout_seconds: Option<u32>,
    /// New retry count.
    #[serde(default)]
    pub retry_count: Option<u32>,
}

/// Validated registration input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEndpoint {
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Destination URL.
    pub url: String,
    /// Sorted, deduplicated subscriptions.
    pub event_types: Vec<EventType>,
    /// Per-attempt timeout.
    pub timeout_seconds: u32,
    /// Retries after the first attempt.
    pub retry_count: u32,
}

/// Validated partial update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointChanges {
    /// New display name.
    pub name: Option<String>,
    /// New description; `Some(None)` clears it.
    pub description: Option<Option<String>>,
    /// New destination URL.
    pub url: Option<String>,
    /// Replacement subscription set.
    pub event_types: Option<Vec<EventType>>,
    /// New timeout.
    pub timeout_seconds: Option<u32>,
    /// New retry count.
    pub retry_count: Option<u32>,
}

impl EndpointSpec {
    /// Validates the spec against `catalog`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` naming the first offending field.
    pub fn validate(self, catalog: &EventCatalog) -> Result<NewEndpoint> {
        Ok(NewEndpoint {
            name: validate_name(&self.name)?,
            description: self
                .description
                .as_deref()
                .map(validate_description)
                .transpose()?
                .flatten(),
            url: validate_url(&self.url)?,
            event_types: validate_event_types(catalog, &self.event_types)?,
            timeout_seconds: validate_timeout(
                self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            )?,
            retry_count: validate_retry_count(self.retry_count.unwrap_or(DEFAULT_RETRY_COUNT))?,
        })
    }
}

impl EndpointPatch {
    /// Validates the fields present in the patch.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` naming the first offending field.
    pub fn validate(self, catalog: &EventCatalog) -> Result<EndpointChanges> {
        Ok(EndpointChanges {
            name: self.name.as_deref().map(validate_name).transpose()?,
            description: self.description.as_deref().map(validate_description).transpose()?,
            url: self.url.as_deref().map(validate_url).transpose()?,
            event_types: self
                .event_types
                .as_deref()
                .map(|types| validate_event_types(catalog, types))
                .transpose()?,
            timeout_seconds: self.timeout_seconds.map(validate_timeout).transpose()?,
            retry_count: self.retry_count.map(validate_retry_count).transpose()?,
        })
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::validation("name", "must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(CoreError::validation(
            "name",
            format!("must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(name.to_string())
}

/// Blank descriptions validate to `None`.
fn validate_description(description: &str) -> Result<Option<String>> {
    if description.trim().is_empty() {
        return Ok(None);
    }
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(CoreError::validation(
            "description",
            format!("must be at most {MAX_DESCRIPTION_LEN} characters"),
        ));
    }
    Ok(Some(description.to_string()))
}

/// Checks that `raw` is an absolute `http` or `https` URL with a host.
///
/// # Errors
///
/// Returns `CoreError::Validation` on `url`.
pub fn validate_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let parsed = Url::parse(raw)
        .map_err(|e| CoreError::validation("url", format!("must be an absolute URL: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CoreError::validation(
            "url",
            format!("scheme must be http or https, got `{}`", parsed.scheme()),
        ));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(CoreError::validation("url", "must include a host"));
    }
    Ok(raw.to_string())
}

fn validate_event_types(catalog: &EventCatalog, raw: &[String]) -> Result<Vec<EventType>> {
    if raw.is_empty() {
        return Err(CoreError::validation("eventTypes", "must contain at least one event type"));
    }

    let mut types = raw
        .iter()
        .map(|name| {
            catalog.resolve(name).map_err(|e| match e {
                CoreError::Validation { message, .. } => {
                    CoreError::validation("eventTypes", message)
                },
                other => other,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    types.sort();
    types.dedup();
    Ok(types)
}

fn validate_timeout(timeout_seconds: u32) -> Result<u32> {
    if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&timeout_seconds) {
        return Err(CoreError::validation(
            "timeoutSeconds",
            format!("must be between {MIN_TIMEOUT_SECONDS} and {MAX_TIMEOUT_SECONDS}"),
        ));
    }
    Ok(timeout_seconds)
}

fn validate_retry_count(retry_count: u32) -> Result<u32> {
    if retry_count > MAX_RETRY_COUNT {
        return Err(CoreError::validation(
            "retryCount",
            format!("must be between 0 and {MAX_RETRY_COUNT}"),
        ));
    }
    Ok(retry_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> EndpointSpec {
        EndpointSpec {
            name: "Pharmacy ERP".into(),
            description: Some("dispensing feed".into()),
            url: "https://erp.example.com/webhooks".into(),
            event_types: vec!["prescription.dispensed".into(), "billing.created".into()],
            timeout_seconds: None,
            retry_count: None,
        }
    }

    fn field_of(err: CoreError) -> String {
        match err {
            CoreError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn valid_spec_gets_defaults() {
        let endpoint = spec().validate(&EventCatalog::default()).unwrap();

        assert_eq!(endpoint.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(endpoint.retry_count, DEFAULT_RETRY_COUNT);
        assert_eq!(endpoint.event_types[0].as_str(), "billing.created");
    }

    #[test]
    fn duplicate_event_types_collapse() {
        let mut spec = spec();
        spec.event_types = vec!["billing.created".into(), "billing.created".into()];

        let endpoint = spec.validate(&EventCatalog::default()).unwrap();

        assert_eq!(endpoint.event_types.len(), 1);
    }

    #[test]
    fn rejects_bad_urls() {
        let catalog = EventCatalog::default();
        for url in ["not a url", "ftp://example.com/x", "/relative/path", "mailto:ops@example.com"]
        {
            let spec = EndpointSpec { url: url.into(), ..spec() };
            assert_eq!(field_of(spec.validate(&catalog).unwrap_err()), "url", "{url}");
        }
    }

    #[test]
    fn rejects_unknown_empty_and_reserved_event_types() {
        let catalog = EventCatalog::default();

        let empty = EndpointSpec { event_types: vec![], ..spec() };
        assert_eq!(field_of(empty.validate(&catalog).unwrap_err()), "eventTypes");

        let unknown = EndpointSpec { event_types: vec!["radiology.scanned".into()], ..spec() };
        assert_eq!(field_of(unknown.validate(&catalog).unwrap_err()), "eventTypes");

        let reserved = EndpointSpec { event_types: vec!["webhook.test".into()], ..spec() };
        assert_eq!(field_of(reserved.validate(&catalog).unwrap_err()), "eventTypes");
    }

    #[test]
    fn enforces_numeric_bounds() {
        let catalog = EventCatalog::default();

        for timeout in [0, 4, 121] {
            let spec = EndpointSpec { timeout_seconds: Some(timeout), ..spec() };
            assert_eq!(field_of(spec.validate(&catalog).unwrap_err()), "timeoutSeconds");
        }
        for timeout in [5, 120] {
            let spec = EndpointSpec { timeout_seconds: Some(timeout), ..spec() };
            assert!(spec.validate(&catalog).is_ok());
        }

        {
            let spec = EndpointSpec { retry_count: Some(6), ..spec() };
            assert_eq!(field_of(spec.validate(&catalog).unwrap_err()), "retryCount");
        }
        {
            let spec = EndpointSpec { retry_count: Some(0), ..spec() };
            assert!(spec.validate(&catalog).is_ok());
        }
    }

    #[test]
    fn patch_validates_only_present_fields() {
        let catalog = EventCatalog::default();

        let changes = EndpointPatch { retry_count: Some(5), ..Default::default() }
            .validate(&catalog)
            .unwrap();
        assert_eq!(changes.retry_count, Some(5));
        assert!(changes.url.is_none());

        let err = EndpointPatch { event_types: Some(vec![]), ..Default::default() }
            .validate(&catalog)
            .unwrap_err();
        assert_eq!(field_of(err), "eventTypes");
    }

    #[test]
    fn blank_description_clears_it() {
        let catalog = EventCatalog::default();

        let changes = EndpointPatch { description: Some("  ".into()), ..Default::default() }
            .validate(&catalog)
            .unwrap();
        assert_eq!(changes.description, Some(None));

        let patch = EndpointPatch { description: Some("night shift".into()), ..Default::default() };
        let changes = patch.validate(&catalog).unwrap();
        assert_eq!(changes.description, Some(Some("night shift".to_string())));

        let unchanged = EndpointPatch::default().validate(&catalog).unwrap();
        assert_eq!(unchanged.description, None);

        let created = EndpointSpec { description: Some(String::new()), ..spec() }
            .validate(&catalog)
            .unwrap();
        assert!(created.description.is_none());
    }
}
