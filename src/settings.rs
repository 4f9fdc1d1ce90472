//! Settings related to the LWM2M client endpoint and its lifecycle engine.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

use std::time::Duration;

// =============================================================================
// Public Interface
// =============================================================================

/// Groups all settings used by the registration engine and acts as a
/// [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// The endpoint client name sent to the servers in register and bootstrap
    /// requests.
    pub endpoint: String,
    /// How long the driver waits for the bootstrap server to send its
    /// `Bootstrap-Finish` once the bootstrap request was accepted.
    pub bootstrap_timeout: Duration,
    /// Subtracted from the registration lifetime when scheduling the next
    /// update, so that the renewal lands before the server expires the
    /// registration.
    pub renewal_margin: Duration,
    /// Bound on each request round-trip. When `None`, the transport applies its
    /// own default.
    pub request_timeout: Option<Duration>,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```
/// use lwm2m_lifecycle::SettingsBuilder;
///
/// let settings = SettingsBuilder::new().endpoint("sensor-42").finalize();
/// assert_eq!(settings.endpoint, "sensor-42");
/// ```
#[derive(Default)]
pub struct SettingsBuilder {
    settings: Settings,
}
impl SettingsBuilder {
    /// Start building the settings using default values.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings::default(),
        }
    }

    /// Set the endpoint client name
    pub fn endpoint<'a>(mut self, endpoint: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.endpoint = endpoint.into().as_ref().to_owned();
        self
    }

    /// Set the ceiling on the wait for the bootstrap session to finish
    pub fn bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.settings.bootstrap_timeout = timeout;
        self
    }

    /// Set the margin taken off the lifetime when scheduling renewals
    pub fn renewal_margin(mut self, margin: Duration) -> Self {
        self.settings.renewal_margin = margin;
        self
    }

    /// Set the bound on each request round-trip
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.settings.request_timeout = Some(timeout);
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            endpoint: "lwm2m-client".into(),
            bootstrap_timeout: Duration::from_secs(10),
            renewal_margin: Duration::from_secs(1),
            request_timeout: None,
            _private_use_builder: (),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            endpoint: "lwm2m-client".into(),
            bootstrap_timeout: Duration::from_secs(10),
            renewal_margin: Duration::from_secs(1),
            request_timeout: None,
            _private_use_builder: (),
        }
    )
}

#[test]
fn endpoint() {
    let settings = SettingsBuilder::new().endpoint("urn:dev:42").finalize();
    assert_eq!(settings.endpoint, "urn:dev:42");
}

#[test]
fn bootstrap_timeout() {
    let timeout = Duration::from_millis(250);
    let settings = SettingsBuilder::new().bootstrap_timeout(timeout).finalize();
    assert_eq!(settings.bootstrap_timeout, timeout);
}

#[test]
fn renewal_margin() {
    let margin = Duration::from_secs(5);
    let settings = SettingsBuilder::new().renewal_margin(margin).finalize();
    assert_eq!(settings.renewal_margin, margin);
}

#[test]
fn request_timeout() {
    let timeout = Duration::from_secs(2);
    let settings = SettingsBuilder::new().request_timeout(timeout).finalize();
    assert_eq!(settings.request_timeout, Some(timeout));
}
