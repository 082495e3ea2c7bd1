use crate::{
    error::{UpdError, UpdResult},
    system::CurrentSystem,
    tag::Tag,
    utils::{Secret, get_default_from_env},
};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubSettings {
    #[serde(default = "GithubSettings::get_api_url")]
    pub api_url: String,
    #[serde(default = "GithubSettings::get_github_token", skip_deserializing)]
    pub github_token: Option<Secret>,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_url: Self::get_api_url(),
            github_token: Self::get_github_token(),
        }
    }
}

impl GithubSettings {
    fn get_api_url() -> String {
        get_default_from_env("GITHUB_API_URL", "https://api.github.com".into())
    }

    pub fn get_github_token() -> Option<Secret> {
        get_default_from_env::<Option<String>>("GITHUB_TOKEN", None).map(Secret::new)
    }
}

/// What a successful release lookup resolved to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseContext {
    pub owner: String,
    pub repo: String,
    pub asset_name: String,
    pub asset_url: String,
    pub latest_tag: Tag,
}

/// Finds the newest installable release of a repository.
pub trait ReleaseLookup {
    /// `Ok(None)` when the repository has no release usable on this system.
    fn latest(
        &self,
        owner: &str,
        repo: &str,
        allow_prerelease: bool,
    ) -> UpdResult<Option<ReleaseContext>>;
}

/// Fetches the bytes behind a URL into a local file.
pub trait AssetTransfer {
    fn transfer(&self, url: &str, destination: &Path) -> UpdResult<()>;
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub browser_download_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    /// Turns the raw release into a context if it is installable on `system`.
    pub fn resolve(
        &self,
        owner: &str,
        repo: &str,
        allow_prerelease: bool,
        system: &CurrentSystem,
    ) -> Option<ReleaseContext> {
        if self.prerelease && !allow_prerelease {
            log::info!("Latest release {} is a prerelease, skipping", self.tag_name);
            return None;
        }
        let Some(latest_tag) = Tag::parse(&self.tag_name) else {
            log::warn!("Latest release tag '{}' is not a valid tag", self.tag_name);
            return None;
        };
        let asset = self.assets.iter().find(|asset| {
            !asset.browser_download_url.is_empty()
                && system.matches_asset(&asset.name, &asset.content_type)
        });
        let Some(asset) = asset else {
            log::warn!(
                "No asset for {} in release {} ({} assets)",
                system,
                self.tag_name,
                self.assets.len()
            );
            return None;
        };
        Some(ReleaseContext {
            owner: owner.to_string(),
            repo: repo.to_string(),
            asset_name: asset.name.clone(),
            asset_url: asset.browser_download_url.clone(),
            latest_tag,
        })
    }
}

#[derive(Clone, Debug)]
pub struct GithubReleases {
    pub api_url: String,
    pub client: Client,
    pub token: Option<Secret>,
    pub system: CurrentSystem,
}

impl GithubReleases {
    pub fn new(settings: &GithubSettings, system: CurrentSystem) -> Self {
        Self {
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            token: settings.github_token.clone(),
            system,
        }
    }

    pub fn request(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        let mut builder = self
            .client
            .get(url)
            .header("User-Agent", concat!("updatr/", env!("CARGO_PKG_VERSION")));
        if let Some(ref token) = self.token {
            builder = builder.header("Authorization", format!("Bearer {}", token.value()));
        }
        builder
    }

    pub fn get_latest_release(&self, owner: &str, repo: &str) -> UpdResult<Option<Release>> {
        if owner.is_empty() || repo.is_empty() {
            return Err(UpdError::LookupFailed(
                "Repository owner and name are required".to_string(),
            ));
        }
        let url = format!("{}/repos/{}/{}/releases?per_page=1", self.api_url, owner, repo);
        log::info!("Fetching latest release information from GitHub {url}");
        let response = self
            .request(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .map_err(|err| UpdError::LookupFailed(err.to_string()))?;
        if !response.status().is_success() {
            return Err(UpdError::LookupFailed(format!(
                "GitHub responded with status {}",
                response.status()
            )));
        }
        let releases: Vec<Release> = response
            .json()
            .map_err(|err| UpdError::LookupFailed(err.to_string()))?;
        Ok(releases.into_iter().next())
    }
}

impl ReleaseLookup for GithubReleases {
    fn latest(
        &self,
        owner: &str,
        repo: &str,
        allow_prerelease: bool,
    ) -> UpdResult<Option<ReleaseContext>> {
        let Some(release) = self.get_latest_release(owner, repo)? else {
            log::warn!("Repository {}/{} has no releases", owner, repo);
            return Ok(None);
        };
        Ok(release.resolve(owner, repo, allow_prerelease, &self.system))
    }
}

impl AssetTransfer for GithubReleases {
    fn transfer(&self, url: &str, destination: &Path) -> UpdResult<()> {
        log::info!("Download {} to {}", url, destination.display());
        let mut response = self
            .request(url)
            .header("Accept", "application/octet-stream")
            .send()
            .map_err(|err| UpdError::TransferFailed(err.to_string()))?;

        if !response.status().is_success() {
            return Err(UpdError::TransferFailed(format!(
                "Download failed with status: {}",
                response.status()
            )));
        }
        let mut file = std::fs::File::create(destination)?;
        response
            .copy_to(&mut file)
            .map_err(|err| UpdError::TransferFailed(err.to_string()))?;
        Ok(())
    }
}
