//! Endpoint fixtures with sensible defaults.

use medhook_core::EndpointSpec;

/// Builder for endpoint registration input.
#[derive(Debug, Clone)]
pub struct EndpointBuilder {
    name: String,
    description: Option<String>,
    url: String,
    event_types: Vec<String>,
    timeout_seconds: Option<u32>,
    retry_count: Option<u32>,
}

impl EndpointBuilder {
    /// Endpoint named "billing sink" subscribed to `billing.created`.
    pub fn with_defaults() -> Self {
        Self {
            name: "billing sink".to_string(),
            description: None,
            url: "https://receiver.example.com/webhooks".to_string(),
            event_types: vec!["billing.created".to_string()],
            timeout_seconds: None,
            retry_count: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Replaces the subscriptions.
    #[must_use]
    pub fn event_types<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = event_types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the per-attempt timeout in seconds.
    #[must_use]
    pub fn timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Sets the number of retries after the first attempt.
    #[must_use]
    pub fn retry_count(mut self, retries: u32) -> Self {
        self.retry_count = Some(retries);
        self
    }

    /// Builds the registration input.
    pub fn build(self) -> EndpointSpec {
        EndpointSpec {
            name: self.name,
            description: self.description,
            url: self.url,
            event_types: self.event_types,
            timeout_seconds: self.timeout_seconds,
            retry_count: self.retry_count,
        }
    }
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::with_defaults()
    }
}
