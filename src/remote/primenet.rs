//! Primenet manual-testing pages (mersenne.org)

use super::{AssignmentSource, ResultSink, SUBMIT_ACK_TOKEN, SessionClient};
use crate::config::{DeviceProfile, ManagerMode, Settings};
use crate::error::{Error, Result};
use crate::records::{RecordGrammar, raise_target};
use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

/// Primenet site root
pub const PRIMENET_URL: &str = "http://www.mersenne.org/";

/// Session, assignment and result client for Primenet
///
/// The login sets a session cookie which the internal cookie store replays on
/// every later request, so [`SessionClient::login`] has to succeed before
/// assignments can be fetched or results submitted.
pub struct PrimenetClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
    mode: ManagerMode,
    grammar: RecordGrammar,
}

impl PrimenetClient {
    /// Create a client against `base_url`
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(
        base_url: Url,
        username: impl Into<String>,
        password: impl Into<String>,
        mode: ManagerMode,
        grammar: RecordGrammar,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(mode.http_timeout())
            .user_agent(concat!("primenet-manager/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            username: username.into(),
            password: password.into(),
            mode,
            grammar,
        })
    }

    /// Create a client for the public Primenet site using the configured credentials
    pub fn from_settings(settings: &Settings, grammar: RecordGrammar) -> Result<Self> {
        let base_url =
            Url::parse(PRIMENET_URL).map_err(|e| Error::config("PrimenetUrl", e.to_string()))?;
        Self::new(
            base_url,
            settings.username.clone(),
            settings.password.clone(),
            settings.mode,
            grammar,
        )
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::config("PrimenetUrl", format!("{path}: {e}")))
    }

    async fn body(response: reqwest::Response, endpoint: &str) -> Result<String> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::protocol(endpoint, format!("HTTP {}", status.as_u16())));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl SessionClient for PrimenetClient {
    async fn login(&self) -> Result<()> {
        let url = self.endpoint("/")?;
        let response = self
            .http
            .post(url)
            .form(&[
                ("user_login", self.username.as_str()),
                ("user_password", self.password.as_str()),
            ])
            .send()
            .await?;
        let body = Self::body(response, "login").await?;

        if body.contains(&format!("{}<br>logged in", self.username)) {
            info!(user = %self.username, "logged in to Primenet");
            Ok(())
        } else {
            Err(Error::NotAuthenticated {
                user: self.username.clone(),
            })
        }
    }
}

#[async_trait]
impl AssignmentSource for PrimenetClient {
    /// Request `count` assignments from the manual assignment page
    ///
    /// In trial factoring mode the bit level of each record is raised to the
    /// device's target exponent.
    async fn fetch(&self, count: usize, profile: &DeviceProfile) -> Result<Vec<String>> {
        let url = self.endpoint("/manual_assignment/")?;
        let pref = profile.work_type.primenet_pref(self.mode).to_string();
        let num_to_get = count.to_string();

        debug!(count, pref = %pref, "requesting Primenet assignments");
        let response = self
            .http
            .get(url)
            .query(&[
                ("cores", "1"),
                ("num_to_get", num_to_get.as_str()),
                ("pref", pref.as_str()),
                ("exp_lo", ""),
                ("exp_hi", ""),
                ("B1", "Get Assignments"),
            ])
            .send()
            .await?;
        let body = Self::body(response, "manual_assignment").await?;

        let raise = self.mode == ManagerMode::TrialFactoring;
        let work: Vec<String> = self
            .grammar
            .assignments(&body)
            .into_iter()
            .map(|record| {
                if raise {
                    raise_target(record, profile.target)
                } else {
                    record.to_string()
                }
            })
            .collect();
        if work.is_empty() {
            warn!(requested = count, "Primenet returned no assignments");
        }
        Ok(work)
    }

    fn name(&self) -> &'static str {
        "primenet"
    }
}

#[async_trait]
impl ResultSink for PrimenetClient {
    async fn submit(&self, batch: &str) -> Result<()> {
        let url = self.endpoint("/manual_result/default.php")?;
        let response = self
            .http
            .post(url)
            .form(&[("data", batch), ("B1", "Submit")])
            .send()
            .await?;
        let body = Self::body(response, "manual_result").await?;

        if body.contains(SUBMIT_ACK_TOKEN) {
            Ok(())
        } else {
            Err(Error::protocol(
                "manual_result",
                format!("response lacks \"{SUBMIT_ACK_TOKEN}\" acknowledgement"),
            ))
        }
    }
}
