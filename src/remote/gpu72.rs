//! GPU to 72 assignment pages (gpu72.com)

use super::AssignmentSource;
use crate::config::{DeviceProfile, ManagerMode, Settings};
use crate::error::{Error, Result};
use crate::records::{RecordGrammar, dedup_exact};
use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

/// GPU72 site root
pub const GPU72_URL: &str = "http://www.gpu72.com/";

/// Trial factoring assignment provider authenticating with HTTP basic auth
pub struct Gpu72Client {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
    grammar: RecordGrammar,
}

impl Gpu72Client {
    /// Create a client against `base_url`
    pub fn new(
        base_url: Url,
        username: impl Into<String>,
        password: impl Into<String>,
        grammar: RecordGrammar,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(ManagerMode::TrialFactoring.http_timeout())
            .user_agent(concat!("primenet-manager/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            username: username.into(),
            password: password.into(),
            grammar,
        })
    }

    /// Create a client for the public GPU72 site using the configured credentials
    pub fn from_settings(settings: &Settings, grammar: RecordGrammar) -> Result<Self> {
        let base_url =
            Url::parse(GPU72_URL).map_err(|e| Error::config("Gpu72Url", e.to_string()))?;
        Self::new(
            base_url,
            settings.gpu72_username.clone(),
            settings.gpu72_password.clone(),
            grammar,
        )
    }
}

#[async_trait]
impl AssignmentSource for Gpu72Client {
    async fn fetch(&self, count: usize, profile: &DeviceProfile) -> Result<Vec<String>> {
        let kind = profile.work_type.gpu72_kind();
        let path = format!("/account/getassignments/{kind}/");
        let url = self
            .base_url
            .join(&path)
            .map_err(|e| Error::config("Gpu72Url", format!("{path}: {e}")))?;

        let number = count.to_string();
        let pledge = profile.target.to_string();
        let option = profile.gpu72_option().to_string();

        debug!(count, kind, pledge = %pledge, option = %option, "requesting GPU72 assignments");
        let response = self
            .http
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .form(&[
                ("Number", number.as_str()),
                ("GHzDays", ""),
                ("Low", ""),
                ("High", ""),
                ("Pledge", pledge.as_str()),
                ("Option", option.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::protocol(
                "gpu72 getassignments",
                format!("HTTP {}", status.as_u16()),
            ));
        }
        let body = response.text().await?;

        // every assignment appears twice in the page source
        let work = dedup_exact(
            self.grammar
                .assignments(&body)
                .into_iter()
                .map(str::to_string)
                .collect(),
        );
        if work.is_empty() {
            warn!(requested = count, "GPU72 returned no assignments");
        }
        Ok(work)
    }

    fn name(&self) -> &'static str {
        "gpu72"
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkType;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> Gpu72Client {
        Gpu72Client::new(
            Url::parse(&server.uri()).unwrap(),
            "carol",
            "pw",
            RecordGrammar::for_mode(ManagerMode::TrialFactoring).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_dedups_repeated_assignments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/account/getassignments/dctf/"))
            .and(header_exists("authorization"))
            .and(body_string_contains("Number=2"))
            .and(body_string_contains("Pledge=74"))
            .and(body_string_contains("Option=9"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<textarea>Factor=A1,70000001,71,74\nFactor=B2,70000003,71,74\n</textarea>\n\
                 <!-- Factor=A1,70000001,71,74 -->\n<!-- Factor=B2,70000003,71,74 -->",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let profile = DeviceProfile {
            work_type: WorkType::Name("dctf".into()),
            work_option: "let_gpu72_decide".into(),
            target: 74,
            ..Default::default()
        };
        let work = client(&server).fetch(2, &profile).await.unwrap();

        assert_eq!(
            work,
            vec!["Factor=A1,70000001,71,74", "Factor=B2,70000003,71,74"]
        );
    }

    #[tokio::test]
    async fn test_fetch_keeps_bit_levels_below_pledge() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/account/getassignments/lltf/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<textarea>Factor=C3,70000005,71,72\n</textarea>"),
            )
            .mount(&server)
            .await;

        let profile = DeviceProfile {
            target: 75,
            ..Default::default()
        };
        let work = client(&server).fetch(1, &profile).await.unwrap();
        assert_eq!(work, vec!["Factor=C3,70000005,71,72"]);
    }

    #[tokio::test]
    async fn test_fetch_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch(1, &DeviceProfile::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }
}
