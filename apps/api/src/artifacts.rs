//! Artifact store: immutable, namespaced storage for generated documents.
//!
//! Bytes live in S3 under `requests/{request_id}/{type}/{filename}`; the
//! `generation_artifacts` table is the index. Artifacts are never
//! overwritten: regenerating a step writes a new, attempt-suffixed filename,
//! preserving the full audit history.

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::generation::ArtifactRow;

#[derive(Clone)]
pub struct ArtifactStore {
    s3: S3Client,
    bucket: String,
}

/// Stable locator returned by `put`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ArtifactLocator {
    pub artifact_id: Uuid,
    pub storage_path: String,
}

impl ArtifactStore {
    pub fn new(s3: S3Client, bucket: String) -> Self {
        Self { s3, bucket }
    }

    /// Writes one artifact under the request's namespace and records it.
    /// Rejects filenames that would escape the namespace.
    pub async fn put(
        &self,
        pool: &PgPool,
        request_id: Uuid,
        step_name: &str,
        artifact_type: &str,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<ArtifactLocator, AppError> {
        validate_filename(filename)?;
        validate_filename(artifact_type)?;

        let key = storage_key(request_id, artifact_type, filename);

        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("S3 upload failed: {e}")))?;

        let artifact_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO generation_artifacts
                (id, request_id, step_name, artifact_type, filename, storage_path, content_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(artifact_id)
        .bind(request_id)
        .bind(step_name)
        .bind(artifact_type)
        .bind(filename)
        .bind(&key)
        .bind(content_type)
        .execute(pool)
        .await?;

        info!("Stored artifact s3://{}/{}", self.bucket, key);
        Ok(ArtifactLocator {
            artifact_id,
            storage_path: key,
        })
    }

    /// Fetches an artifact's bytes and content type. A filename with no
    /// record or no object behind it is NotFoundError, never a crash.
    pub async fn get(
        &self,
        pool: &PgPool,
        request_id: Uuid,
        artifact_type: &str,
        filename: &str,
    ) -> Result<(ArtifactRow, Vec<u8>), AppError> {
        validate_filename(filename)?;
        validate_filename(artifact_type)?;

        let row: ArtifactRow = sqlx::query_as(
            r#"
            SELECT * FROM generation_artifacts
            WHERE request_id = $1 AND artifact_type = $2 AND filename = $3
            "#,
        )
        .bind(request_id)
        .bind(artifact_type)
        .bind(filename)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Artifact {filename} not found for request {request_id}"
            ))
        })?;

        let object = self
            .s3
            .get_object()
            .bucket(&self.bucket)
            .key(&row.storage_path)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) {
                    AppError::NotFound(format!("Artifact object {} is missing", row.storage_path))
                } else {
                    AppError::Storage(format!("S3 download failed: {e}"))
                }
            })?;

        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| AppError::Storage(format!("S3 body read failed: {e}")))?
            .into_bytes()
            .to_vec();

        Ok((row, bytes))
    }

}

/// All artifact records of a request, oldest first. Rows only; bytes stay
/// in S3 until a specific artifact is fetched.
pub async fn list_for_request(
    pool: &PgPool,
    request_id: Uuid,
) -> Result<Vec<ArtifactRow>, AppError> {
    let rows = sqlx::query_as(
        "SELECT * FROM generation_artifacts WHERE request_id = $1 ORDER BY created_at ASC",
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Builds the namespaced object key.
pub fn storage_key(request_id: Uuid, artifact_type: &str, filename: &str) -> String {
    format!("requests/{request_id}/{artifact_type}/{filename}")
}

/// Appends the attempt suffix for regenerated artifacts: the first attempt
/// keeps the plain name, later attempts get `-attemptN` before the extension.
pub fn attempt_filename(base: &str, attempt: i32) -> String {
    if attempt <= 1 {
        return base.to_string();
    }
    match base.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-attempt{attempt}.{ext}"),
        None => format!("{base}-attempt{attempt}"),
    }
}

/// Path-traversal guard: a filename (or type segment) must be a single,
/// plain path component.
fn validate_filename(name: &str) -> Result<(), AppError> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.starts_with('.')
    {
        return Err(AppError::Validation(format!(
            "Invalid artifact path segment '{name}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_is_namespaced_by_request() {
        let id = Uuid::new_v4();
        let key = storage_key(id, "resume", "resume.md");
        assert_eq!(key, format!("requests/{id}/resume/resume.md"));
    }

    #[test]
    fn test_traversal_filenames_rejected() {
        for bad in ["../escape.md", "a/b.md", "..", ".hidden", "", "a\\b.md"] {
            assert!(
                validate_filename(bad).is_err(),
                "'{bad}' should be rejected"
            );
        }
        assert!(validate_filename("resume-attempt2.md").is_ok());
    }

    #[test]
    fn test_attempt_filename_first_attempt_is_plain() {
        assert_eq!(attempt_filename("resume.md", 1), "resume.md");
    }

    #[test]
    fn test_attempt_filename_suffixes_later_attempts() {
        assert_eq!(attempt_filename("resume.md", 2), "resume-attempt2.md");
        assert_eq!(attempt_filename("resume.md", 3), "resume-attempt3.md");
        assert_eq!(attempt_filename("data", 2), "data-attempt2");
    }

    #[test]
    fn test_attempt_filenames_unique_per_attempt() {
        let names: Vec<String> = (1..=4).map(|a| attempt_filename("cover.md", a)).collect();
        let mut deduped = names.clone();
        deduped.dedup();
        assert_eq!(names, deduped);
    }
}
