//! Publishing a folder to a model repository.
//!
//! The flow mirrors the hub's commit API: ask the preupload endpoint which
//! files must go through LFS, push those through the LFS batch API, then send a
//! single NDJSON commit listing inline (base64) files and LFS pointers.

use crate::error::{HubError, HubResult};
use crate::download::HubClient;
use crate::repo::{DEFAULT_REVISION, RepoKind, split_repo_id};
use crate::token::HubToken;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const LFS_CONTENT_TYPE: &str = "application/vnd.git-lfs+json";
const SAMPLE_BYTES: usize = 512;

/// A local file and where it lands in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub path_in_repo: String,
    pub local_path: PathBuf,
}

/// One entry of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOperation {
    Inline { path: String, content_base64: String },
    Lfs { path: String, oid: String, size: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    Regular,
    Lfs,
}

#[derive(Serialize)]
struct PreuploadFile<'a> {
    path: &'a str,
    size: u64,
    sample: String,
}

#[derive(Serialize)]
struct PreuploadRequest<'a> {
    files: Vec<PreuploadFile<'a>>,
}

#[derive(Deserialize)]
struct PreuploadResponse {
    files: Vec<PreuploadVerdict>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreuploadVerdict {
    path: String,
    upload_mode: UploadMode,
    #[serde(default)]
    should_ignore: bool,
}

#[derive(Deserialize)]
struct LfsBatchResponse {
    objects: Vec<LfsObject>,
}

#[derive(Deserialize)]
struct LfsObject {
    oid: String,
    #[serde(default)]
    actions: Option<LfsActions>,
    #[serde(default)]
    error: Option<LfsObjectError>,
}

#[derive(Deserialize)]
struct LfsActions {
    upload: Option<LfsAction>,
    verify: Option<LfsAction>,
}

#[derive(Deserialize)]
struct LfsAction {
    href: String,
    #[serde(default)]
    header: HashMap<String, String>,
}

#[derive(Deserialize)]
struct LfsObjectError {
    code: u16,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    commit_url: Option<String>,
}

#[derive(Deserialize)]
struct WhoAmI {
    name: String,
}

/// Collect every regular file under `folder`, keyed by its `/`-separated
/// path relative to the folder. Hidden entries are skipped.
pub fn collect_folder(folder: &Path) -> HubResult<Vec<UploadFile>> {
    let mut out = Vec::new();
    collect_into(folder, folder, &mut out)?;
    out.sort_by(|a, b| a.path_in_repo.cmp(&b.path_in_repo));
    Ok(out)
}

fn collect_into(root: &Path, dir: &Path, out: &mut Vec<UploadFile>) -> HubResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            collect_into(root, &path, out)?;
        } else if path.is_file() {
            let rel = path
                .strip_prefix(root)
                .map_err(|e| HubError::Upload(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push(UploadFile { path_in_repo: rel, local_path: path });
        }
    }
    Ok(())
}

/// Render the NDJSON body of a commit.
pub fn commit_ndjson(summary: &str, operations: &[CommitOperation]) -> HubResult<String> {
    let mut lines = Vec::with_capacity(operations.len() + 1);
    lines.push(serde_json::to_string(&json!({
        "key": "header",
        "value": { "summary": summary, "description": "" }
    }))?);

    for op in operations {
        let line = match op {
            CommitOperation::Inline { path, content_base64 } => json!({
                "key": "file",
                "value": { "content": content_base64, "path": path, "encoding": "base64" }
            }),
            CommitOperation::Lfs { path, oid, size } => json!({
                "key": "lfsFile",
                "value": { "path": path, "algo": "sha256", "oid": oid, "size": size }
            }),
        };
        lines.push(serde_json::to_string(&line)?);
    }

    let mut body = lines.join("\n");
    body.push('\n');
    Ok(body)
}

/// SHA-256 of a file, streamed.
pub fn sha256_hex(path: &Path) -> HubResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn sample_base64(path: &Path) -> HubResult<String> {
    let mut buf = Vec::with_capacity(SAMPLE_BYTES);
    std::fs::File::open(path)?.take(SAMPLE_BYTES as u64).read_to_end(&mut buf)?;
    Ok(BASE64.encode(buf))
}

async fn error_for_status(response: reqwest::Response, what: &str) -> HubResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(HubError::Unauthorized(format!("{what} ({status}): {body}")))
        }
        StatusCode::NOT_FOUND => Err(HubError::NotFound(format!("{what}: {body}"))),
        _ => Err(HubError::Api(format!("{what} failed ({status}): {body}"))),
    }
}

impl HubClient {
    fn require_token(&self) -> HubResult<&HubToken> {
        self.token().ok_or_else(|| {
            HubError::Unauthorized("set HF_TOKEN or log in to the hub before pushing".to_string())
        })
    }

    /// Name of the account owning the token.
    pub async fn whoami(&self) -> HubResult<String> {
        let token = self.require_token()?;
        let response = self
            .http
            .get(format!("{}/api/whoami-v2", self.endpoint))
            .bearer_auth(token.expose())
            .send()
            .await?;
        let who: WhoAmI = error_for_status(response, "whoami").await?.json().await?;
        Ok(who.name)
    }

    /// Create a model repository. An already existing repository is not an error.
    pub async fn create_repo(&self, repo_id: &str, private: bool) -> HubResult<String> {
        let token = self.require_token()?;
        let (organization, name) = split_repo_id(repo_id);

        let mut body = json!({ "name": name, "type": "model", "private": private });
        if let Some(org) = organization {
            body["organization"] = json!(org);
        }

        let response = self
            .http
            .post(format!("{}/api/repos/create", self.endpoint))
            .bearer_auth(token.expose())
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            debug!(repo_id, "repository already exists");
        } else {
            error_for_status(response, "create repo").await?;
            info!(repo_id, private, "created model repository");
        }

        Ok(format!("{}/{}", self.endpoint, repo_id))
    }

    /// Upload every file in `folder` to `repo_id` as one commit on `main`.
    pub async fn upload_folder(&self, repo_id: &str, folder: &Path, summary: &str) -> HubResult<String> {
        let files = collect_folder(folder)?;
        if files.is_empty() {
            return Err(HubError::Upload(format!("nothing to upload in {}", folder.display())));
        }

        let modes = self.preupload(repo_id, &files).await?;
        let mut operations = Vec::with_capacity(files.len());

        for file in &files {
            match modes.get(&file.path_in_repo) {
                None => {
                    debug!(path = %file.path_in_repo, "skipped by hub ignore rules");
                }
                Some(UploadMode::Regular) => {
                    let bytes = tokio::fs::read(&file.local_path).await?;
                    operations.push(CommitOperation::Inline {
                        path: file.path_in_repo.clone(),
                        content_base64: BASE64.encode(bytes),
                    });
                }
                Some(UploadMode::Lfs) => {
                    let oid = sha256_hex(&file.local_path)?;
                    let size = std::fs::metadata(&file.local_path)?.len();
                    self.upload_lfs(repo_id, file, &oid, size).await?;
                    operations.push(CommitOperation::Lfs { path: file.path_in_repo.clone(), oid, size });
                }
            }
        }

        self.commit(repo_id, summary, &operations).await
    }

    async fn preupload(&self, repo_id: &str, files: &[UploadFile]) -> HubResult<HashMap<String, UploadMode>> {
        let token = self.require_token()?;

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            entries.push(PreuploadFile {
                path: &file.path_in_repo,
                size: std::fs::metadata(&file.local_path)?.len(),
                sample: sample_base64(&file.local_path)?,
            });
        }

        let response = self
            .http
            .post(format!(
                "{}/api/{}/{}/preupload/{}",
                self.endpoint,
                RepoKind::Model.api_segment(),
                repo_id,
                DEFAULT_REVISION
            ))
            .bearer_auth(token.expose())
            .json(&PreuploadRequest { files: entries })
            .send()
            .await?;

        let verdicts: PreuploadResponse = error_for_status(response, "preupload").await?.json().await?;
        Ok(verdicts
            .files
            .into_iter()
            .filter(|v| !v.should_ignore)
            .map(|v| (v.path, v.upload_mode))
            .collect())
    }

    async fn upload_lfs(&self, repo_id: &str, file: &UploadFile, oid: &str, size: u64) -> HubResult<()> {
        let token = self.require_token()?;

        let response = self
            .http
            .post(format!("{}/{}.git/info/lfs/objects/batch", self.endpoint, repo_id))
            .bearer_auth(token.expose())
            .header(reqwest::header::ACCEPT, LFS_CONTENT_TYPE)
            .header(reqwest::header::CONTENT_TYPE, LFS_CONTENT_TYPE)
            .body(serde_json::to_vec(&json!({
                "operation": "upload",
                "transfers": ["basic"],
                "objects": [{ "oid": oid, "size": size }],
                "hash_algo": "sha256"
            }))?)
            .send()
            .await?;

        let batch: LfsBatchResponse = error_for_status(response, "lfs batch").await?.json().await?;
        let object = batch
            .objects
            .into_iter()
            .find(|o| o.oid == oid)
            .ok_or_else(|| HubError::Upload(format!("lfs batch did not answer for {}", file.path_in_repo)))?;

        if let Some(err) = object.error {
            return Err(HubError::Upload(format!("{}: lfs error {}: {}", file.path_in_repo, err.code, err.message)));
        }

        // No actions means the object is already stored.
        let Some(actions) = object.actions else {
            debug!(path = %file.path_in_repo, "lfs object already present");
            return Ok(());
        };

        if let Some(upload) = actions.upload {
            if upload.header.contains_key("chunk_size") {
                return Err(HubError::Upload(format!(
                    "{} requires a multipart LFS upload, which is not supported",
                    file.path_in_repo
                )));
            }

            info!(path = %file.path_in_repo, size, "uploading lfs object");
            let handle = tokio::fs::File::open(&file.local_path).await?;
            let mut request = self
                .http
                .put(&upload.href)
                .header(reqwest::header::CONTENT_LENGTH, size)
                .body(reqwest::Body::from(handle));
            for (name, value) in &upload.header {
                request = request.header(name.as_str(), value.as_str());
            }
            error_for_status(request.send().await?, "lfs upload").await?;
        }

        if let Some(verify) = actions.verify {
            let mut request = self
                .http
                .post(&verify.href)
                .bearer_auth(token.expose())
                .json(&json!({ "oid": oid, "size": size }));
            for (name, value) in &verify.header {
                request = request.header(name.as_str(), value.as_str());
            }
            error_for_status(request.send().await?, "lfs verify").await?;
        }

        Ok(())
    }

    async fn commit(&self, repo_id: &str, summary: &str, operations: &[CommitOperation]) -> HubResult<String> {
        let token = self.require_token()?;
        let body = commit_ndjson(summary, operations)?;

        let response = self
            .http
            .post(format!(
                "{}/api/{}/{}/commit/{}",
                self.endpoint,
                RepoKind::Model.api_segment(),
                repo_id,
                DEFAULT_REVISION
            ))
            .bearer_auth(token.expose())
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let commit: CommitResponse = error_for_status(response, "commit").await?.json().await?;
        info!(repo_id, files = operations.len(), "pushed commit to hub");
        Ok(commit.commit_url.unwrap_or_else(|| format!("{}/{}", self.endpoint, repo_id)))
    }
}
