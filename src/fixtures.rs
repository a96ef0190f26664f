//! Server-side fixtures: buckets, objects and multipart uploads.
//!
//! A [`FixtureSet`] records what a test case created so that its cleanup
//! knows what to remove.  Batches of independent operations (N object
//! uploads, N part uploads, N deletes) run through
//! [`crate::orchestrator::run_batch`].

use base64::Engine;
use bytes::Bytes;
use http::StatusCode;
use md5::{Digest, Md5};
use rand::{Rng, RngCore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{BatchFailure, Error, IndexedError};
use crate::orchestrator::run_batch;
use crate::request::{RequestDescriptor, ResponseRecord};
use crate::verify::{verify, Expectation};
use crate::{xml, Env};

/// Prefix of every bucket the verifier creates.
pub const BUCKET_PREFIX: &str = "s3verify";

/// Smallest part size S3 accepts for any part but the last.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Smallest generated object body.
const MIN_OBJECT_SIZE: usize = 32 * 1024;

/// Spread of generated object sizes above [`MIN_OBJECT_SIZE`].
const OBJECT_SIZE_SPREAD: usize = 1 << 20;

/// An object known to exist on the server.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub key: String,
    pub body: Bytes,
    /// ETag as returned by the server, quotes included.
    pub etag: String,
    /// `Last-Modified` as returned by the server (HTTP date).
    pub last_modified: String,
}

/// One uploaded part.
#[derive(Debug, Clone)]
pub struct PartInfo {
    pub number: u32,
    pub etag: String,
    pub body: Bytes,
}

/// An initiated multipart upload and the parts uploaded to it so far.
#[derive(Debug, Clone)]
pub struct UploadInfo {
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<PartInfo>,
}

/// Resources one test case (or a prepared run) owns on the server.
#[derive(Debug, Clone)]
pub struct FixtureSet {
    pub bucket: String,
    pub objects: Vec<ObjectInfo>,
    pub uploads: Vec<UploadInfo>,
    /// Only an owner tears the set down.
    pub owned: bool,
}

impl FixtureSet {
    /// An empty, owned set for `bucket`.  The bucket is not created.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Vec::new(),
            uploads: Vec::new(),
            owned: true,
        }
    }

    /// A copy that never tears anything down.
    pub fn borrowed(&self) -> Self {
        Self {
            owned: false,
            ..self.clone()
        }
    }

    /// The first seeded object.
    pub fn first_object(&self) -> Result<&ObjectInfo, Error> {
        self.objects
            .first()
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("fixture set has no objects")))
    }

    /// The first initiated upload.
    pub fn first_upload(&self) -> Result<&UploadInfo, Error> {
        self.uploads
            .first()
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("fixture set has no uploads")))
    }
}

// ── Names and payloads ──────────────────────────────────────────────

/// `prefix-<uuid>`; valid as both a bucket name and an object key.
pub fn random_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Random bytes, between 32 KiB and a little over 1 MiB.
pub fn random_object_body() -> Bytes {
    let size = MIN_OBJECT_SIZE + rand::thread_rng().gen_range(0..OBJECT_SIZE_SPREAD);
    random_body(size)
}

/// `size` random bytes.
pub fn random_body(size: usize) -> Bytes {
    let mut buf = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut buf);
    Bytes::from(buf)
}

/// Base64 MD5 of `body`, as sent in `Content-MD5`.
pub fn content_md5(body: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(Md5::digest(body))
}

/// The ETag S3 assigns to a single-part object: its quoted hex MD5.
pub fn expected_etag(body: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Md5::digest(body)))
}

/// The ETag S3 assigns to a completed multipart object: the MD5 of the
/// concatenated binary part MD5s, suffixed with the part count.
pub fn multipart_etag<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = Md5::new();
    let mut count = 0;
    for part in parts {
        hasher.update(Md5::digest(part));
        count += 1;
    }
    format!("\"{}-{count}\"", hex::encode(hasher.finalize()))
}

// ── Single operations ───────────────────────────────────────────────

fn expect_status(response: &ResponseRecord, status: StatusCode) -> Result<(), Error> {
    verify(response, &Expectation::status(status)).map_err(Error::from)
}

fn required_header(response: &ResponseRecord, name: &str, op: &str) -> Result<String, Error> {
    response
        .header(name)
        .map(str::to_string)
        .ok_or_else(|| Error::Protocol(format!("{op} response has no {name} header")))
}

/// Create `bucket`.
pub async fn create_bucket(env: &Env, bucket: &str) -> Result<(), Error> {
    let response = env.send(RequestDescriptor::put().bucket(bucket)).await?;
    expect_status(&response, StatusCode::OK)?;
    debug!("created bucket {bucket}");
    Ok(())
}

/// Upload `body` under `key`, then read back its ETag and Last-Modified.
pub async fn put_object(env: &Env, bucket: &str, key: &str, body: Bytes) -> Result<ObjectInfo, Error> {
    let request = RequestDescriptor::put()
        .bucket(bucket)
        .object(key)
        .header("Content-MD5", content_md5(&body))
        .header("Content-Type", "application/octet-stream")
        .body(body.clone());
    let response = env.send(request).await?;
    expect_status(&response, StatusCode::OK)?;

    let head = env
        .send(RequestDescriptor::head().bucket(bucket).object(key))
        .await?;
    expect_status(&head, StatusCode::OK)?;

    Ok(ObjectInfo {
        key: key.to_string(),
        body,
        etag: required_header(&head, "ETag", "HeadObject")?,
        last_modified: required_header(&head, "Last-Modified", "HeadObject")?,
    })
}

/// Start a multipart upload for `key`.
pub async fn initiate_upload(env: &Env, bucket: &str, key: &str) -> Result<UploadInfo, Error> {
    let response = env
        .send(
            RequestDescriptor::post()
                .bucket(bucket)
                .object(key)
                .query("uploads", ""),
        )
        .await?;
    expect_status(&response, StatusCode::OK)?;
    let upload_id = xml::first_value(&response.body, "UploadId")
        .map_err(|e| Error::Protocol(format!("InitiateMultipartUpload: {e}")))?
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Protocol("InitiateMultipartUpload returned no UploadId".into()))?;
    Ok(UploadInfo {
        key: key.to_string(),
        upload_id,
        parts: Vec::new(),
    })
}

/// The request that uploads part `number` of `upload`.
pub fn upload_part_request(bucket: &str, upload: &UploadInfo, number: u32, body: Bytes) -> RequestDescriptor {
    RequestDescriptor::put()
        .bucket(bucket)
        .object(upload.key.clone())
        .query("partNumber", number.to_string())
        .query("uploadId", upload.upload_id.clone())
        .body(body)
}

/// Upload one part.
pub async fn upload_part(
    env: &Env,
    bucket: &str,
    upload: &UploadInfo,
    number: u32,
    body: Bytes,
) -> Result<PartInfo, Error> {
    let response = env
        .send(upload_part_request(bucket, upload, number, body.clone()))
        .await?;
    expect_status(&response, StatusCode::OK)?;
    Ok(PartInfo {
        number,
        etag: required_header(&response, "ETag", "UploadPart")?,
        body,
    })
}

/// Abort an upload.  An upload that is already gone counts as aborted.
pub async fn abort_upload(env: &Env, bucket: &str, key: &str, upload_id: &str) -> Result<(), Error> {
    let response = env
        .send(
            RequestDescriptor::delete()
                .bucket(bucket)
                .object(key)
                .query("uploadId", upload_id),
        )
        .await?;
    accept_deleted(&response)
}

/// Delete one object.
pub async fn delete_object(env: &Env, bucket: &str, key: &str) -> Result<(), Error> {
    let response = env
        .send(RequestDescriptor::delete().bucket(bucket).object(key))
        .await?;
    accept_deleted(&response)
}

/// Delete `bucket`.  A bucket that does not exist counts as deleted.
pub async fn delete_bucket(env: &Env, bucket: &str) -> Result<(), Error> {
    let response = env.send(RequestDescriptor::delete().bucket(bucket)).await?;
    accept_deleted(&response)?;
    debug!("deleted bucket {bucket}");
    Ok(())
}

fn accept_deleted(response: &ResponseRecord) -> Result<(), Error> {
    match response.status {
        StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
        _ => expect_status(response, StatusCode::NO_CONTENT),
    }
}

/// Keys currently stored in `bucket`.  A missing bucket has none.
pub async fn list_keys(env: &Env, bucket: &str) -> Result<Vec<String>, Error> {
    let response = env.send(RequestDescriptor::get().bucket(bucket)).await?;
    if response.status == StatusCode::NOT_FOUND {
        return Ok(Vec::new());
    }
    expect_status(&response, StatusCode::OK)?;
    xml::element_values(&response.body, "Key")
        .map_err(|e| Error::Protocol(format!("ListObjects: {e}")))
}

/// In-progress uploads of `bucket` as (key, upload id).  A missing bucket
/// has none.
pub async fn list_uploads(env: &Env, bucket: &str) -> Result<Vec<(String, String)>, Error> {
    let response = env
        .send(RequestDescriptor::get().bucket(bucket).query("uploads", ""))
        .await?;
    if response.status == StatusCode::NOT_FOUND {
        return Ok(Vec::new());
    }
    expect_status(&response, StatusCode::OK)?;
    let protocol = |e: String| Error::Protocol(format!("ListMultipartUploads: {e}"));
    let keys = xml::element_values(&response.body, "Key").map_err(protocol)?;
    let ids = xml::element_values(&response.body, "UploadId").map_err(protocol)?;
    if keys.len() != ids.len() {
        return Err(Error::Protocol(format!(
            "ListMultipartUploads: {} keys for {} upload ids",
            keys.len(),
            ids.len()
        )));
    }
    Ok(keys.into_iter().zip(ids).collect())
}

// ── Batches ─────────────────────────────────────────────────────────

/// Upload `count` random objects into `set.bucket`.
///
/// Objects that were created are recorded in `set` even when others fail,
/// so that a rollback can find them.
pub async fn create_objects(env: &Env, set: &mut FixtureSet, count: usize) -> Result<(), Error> {
    let units: Vec<_> = (0..count)
        .map(|_| {
            let env = env.clone();
            let bucket = set.bucket.clone();
            let key = random_name(BUCKET_PREFIX);
            let body = random_object_body();
            move || async move { put_object(&env, &bucket, &key, body).await }
        })
        .collect();

    match run_batch(env.concurrency(), units).await.into_values() {
        Ok(objects) => {
            info!("seeded {} object(s) in {}", objects.len(), set.bucket);
            set.objects.extend(objects);
            Ok(())
        }
        Err((created, batch)) => {
            set.objects.extend(created);
            Err(Error::FixtureSetup {
                batch,
                rollback: None,
            })
        }
    }
}

/// Upload one part per entry of `sizes` to `set.uploads[upload]`.
pub async fn upload_parts(
    env: &Env,
    set: &mut FixtureSet,
    upload: usize,
    sizes: &[usize],
) -> Result<(), Error> {
    let target = set
        .uploads
        .get(upload)
        .cloned()
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("no upload at index {upload}")))?;
    let first_number = target.parts.len() as u32 + 1;

    let units: Vec<_> = sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let env = env.clone();
            let bucket = set.bucket.clone();
            let target = target.clone();
            let body = random_body(size);
            let number = first_number + i as u32;
            move || async move { upload_part(&env, &bucket, &target, number, body).await }
        })
        .collect();

    let result = run_batch(env.concurrency(), units).await.into_values();
    let (parts, outcome) = match result {
        Ok(parts) => (parts, Ok(())),
        Err((parts, batch)) => (
            parts,
            Err(Error::FixtureSetup {
                batch,
                rollback: None,
            }),
        ),
    };
    if let Some(entry) = set.uploads.get_mut(upload) {
        entry.parts.extend(parts);
    }
    outcome
}

/// Best-effort removal of everything `set` owns.
///
/// Aborts its uploads, deletes every key found in (or recorded for) the
/// bucket, then the bucket itself.  Every operation is attempted; the
/// failures are reported together.  Borrowed sets are left alone.
pub async fn teardown(env: &Env, set: &FixtureSet) -> Result<(), Error> {
    if !set.owned {
        debug!("leaving shared fixtures in {} in place", set.bucket);
        return Ok(());
    }

    let mut failures = Vec::new();
    let mut total = 0;

    let aborts: Vec<_> = set
        .uploads
        .iter()
        .map(|upload| {
            let env = env.clone();
            let bucket = set.bucket.clone();
            let key = upload.key.clone();
            let upload_id = upload.upload_id.clone();
            move || async move { abort_upload(&env, &bucket, &key, &upload_id).await }
        })
        .collect();
    let (_, failed) = run_batch(env.concurrency(), aborts).await.split();
    collect_failures(failed, set.uploads.len(), &mut total, &mut failures);

    let mut keys: Vec<String> = set
        .objects
        .iter()
        .map(|o| o.key.clone())
        .chain(set.uploads.iter().map(|u| u.key.clone()))
        .collect();
    total += 1;
    match list_keys(env, &set.bucket).await {
        Ok(listed) => keys.extend(listed),
        Err(error) => failures.push(IndexedError {
            index: total - 1,
            error: Box::new(error),
        }),
    }
    keys.sort();
    keys.dedup();

    let deletes: Vec<_> = keys
        .iter()
        .map(|key| {
            let env = env.clone();
            let bucket = set.bucket.clone();
            let key = key.clone();
            move || async move { delete_object(&env, &bucket, &key).await }
        })
        .collect();
    let (_, failed) = run_batch(env.concurrency(), deletes).await.split();
    collect_failures(failed, keys.len(), &mut total, &mut failures);

    total += 1;
    if let Err(error) = delete_bucket(env, &set.bucket).await {
        failures.push(IndexedError {
            index: total - 1,
            error: Box::new(error),
        });
    }

    if failures.is_empty() {
        debug!("tore down {}", set.bucket);
        Ok(())
    } else {
        warn!("{} cleanup operation(s) failed for {}", failures.len(), set.bucket);
        Err(Error::FixtureCleanup(BatchFailure { total, failures }))
    }
}

/// Renumber a sub-batch's failures into the overall teardown sequence.
fn collect_failures(
    batch_failures: Vec<IndexedError>,
    batch_len: usize,
    total: &mut usize,
    failures: &mut Vec<IndexedError>,
) {
    let offset = *total;
    failures.extend(batch_failures.into_iter().map(|f| IndexedError {
        index: offset + f.index,
        error: f.error,
    }));
    *total += batch_len;
}

/// Tear `set` down after a failed setup and fold any rollback failure
/// into `err`.
pub async fn rollback(env: &Env, set: &FixtureSet, err: Error) -> Error {
    let Err(cleanup) = teardown(env, set).await else {
        return err;
    };
    match err {
        Error::FixtureSetup { batch, .. } => Error::FixtureSetup {
            batch,
            rollback: Some(Box::new(cleanup)),
        },
        other => {
            warn!("rollback of {} failed: {cleanup}", set.bucket);
            other
        }
    }
}

// ── Provisioning ────────────────────────────────────────────────────

/// A fresh bucket with nothing in it.
pub async fn seed_bucket(env: &Env) -> Result<FixtureSet, Error> {
    let set = FixtureSet::new(random_name(BUCKET_PREFIX));
    create_bucket(env, &set.bucket).await?;
    Ok(set)
}

/// A fresh bucket holding `count` random objects.
pub async fn seed_objects(env: &Env, count: usize) -> Result<FixtureSet, Error> {
    let mut set = seed_bucket(env).await?;
    if let Err(err) = create_objects(env, &mut set, count).await {
        return Err(rollback(env, &set, err).await);
    }
    Ok(set)
}

/// A fresh bucket with one initiated upload and one part per `sizes` entry.
pub async fn seed_upload(env: &Env, sizes: &[usize]) -> Result<FixtureSet, Error> {
    let mut set = seed_bucket(env).await?;
    match initiate_upload(env, &set.bucket, &random_name(BUCKET_PREFIX)).await {
        Ok(upload) => set.uploads.push(upload),
        Err(err) => return Err(rollback(env, &set, err).await),
    }
    if let Err(err) = upload_parts(env, &mut set, 0, sizes).await {
        return Err(rollback(env, &set, err).await);
    }
    Ok(set)
}
