use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::{path::Path as ObjectPath, ObjectStore};
use tracing::{debug, info};
use url::Url;

use crate::error::IngestError;

/// Where an input file (or a directory of them) lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Local(PathBuf),
    Remote {
        scheme: String,
        bucket: String,
        path: String,
    },
}

impl SourceLocation {
    pub fn parse(location: &str) -> Result<Self, IngestError> {
        let url = match Url::parse(location) {
            Ok(url) => url,
            Err(_) => return Ok(SourceLocation::Local(PathBuf::from(location))),
        };

        match url.scheme() {
            "file" => url
                .to_file_path()
                .map(SourceLocation::Local)
                .map_err(|_| IngestError::Source {
                    message: format!("Invalid file URL: {}", location),
                }),
            scheme @ ("gs" | "s3") => {
                let bucket = url.host_str().ok_or_else(|| IngestError::Source {
                    message: format!("Invalid {} URL: missing bucket", scheme),
                })?;
                Ok(SourceLocation::Remote {
                    scheme: scheme.to_string(),
                    bucket: bucket.to_string(),
                    path: url.path().trim_start_matches('/').to_string(),
                })
            }
            scheme => Err(IngestError::Source {
                message: format!("Unsupported storage scheme: {}", scheme),
            }),
        }
    }

    /// Last path segment, used as the dataset name.
    pub fn file_name(&self) -> Option<String> {
        match self {
            SourceLocation::Local(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            SourceLocation::Remote { path, .. } => path
                .split('/')
                .next_back()
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        }
    }

    fn is_file(&self) -> bool {
        match self {
            SourceLocation::Local(path) => !path.is_dir(),
            SourceLocation::Remote { path, .. } => is_file_path(path),
        }
    }

    fn open(&self) -> Result<(Arc<dyn ObjectStore>, ObjectPath), IngestError> {
        match self {
            SourceLocation::Local(path) => {
                let object_path =
                    ObjectPath::from_filesystem_path(path).map_err(|e| IngestError::Source {
                        message: format!("Invalid local path {}: {}", path.display(), e),
                    })?;
                Ok((Arc::new(LocalFileSystem::new()), object_path))
            }
            SourceLocation::Remote {
                scheme,
                bucket,
                path,
            } => {
                let store = match scheme.as_str() {
                    "gs" => create_gcs_client(bucket)?,
                    _ => create_s3_client(bucket)?,
                };
                Ok((store, ObjectPath::from(path.as_str())))
            }
        }
    }

    /// The location of an object listed from the same store.
    fn sibling(&self, object_path: &ObjectPath) -> SourceLocation {
        match self {
            SourceLocation::Local(_) => {
                let relative: &str = object_path.as_ref();
                SourceLocation::Local(Path::new("/").join(relative))
            }
            SourceLocation::Remote { scheme, bucket, .. } => SourceLocation::Remote {
                scheme: scheme.clone(),
                bucket: bucket.clone(),
                path: object_path.to_string(),
            },
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceLocation::Local(path) => write!(f, "{}", path.display()),
            SourceLocation::Remote {
                scheme,
                bucket,
                path,
            } => write!(f, "{}://{}/{}", scheme, bucket, path),
        }
    }
}

fn is_file_path(path: &str) -> bool {
    let filename = path.split('/').next_back().unwrap_or("");
    filename.contains('.') && !filename.ends_with('/')
}

/// Directory listings only pick up `.csv` files, in any letter case.
fn is_csv_path(path: &str) -> bool {
    let filename = path.split('/').next_back().unwrap_or("");
    filename
        .rsplit_once('.')
        .is_some_and(|(stem, extension)| !stem.is_empty() && extension.eq_ignore_ascii_case("csv"))
}

pub fn create_gcs_client(bucket_name: &str) -> Result<Arc<dyn ObjectStore>, IngestError> {
    let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(bucket_name);

    if let Ok(service_account_path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
        builder = builder.with_service_account_path(service_account_path);
    }

    let store = builder.build().map_err(|e| IngestError::Source {
        message: format!(
            "Failed to create GCS client for bucket '{}': {}",
            bucket_name, e
        ),
    })?;

    Ok(Arc::new(store))
}

pub fn create_s3_client(bucket_name: &str) -> Result<Arc<dyn ObjectStore>, IngestError> {
    let store = AmazonS3Builder::from_env()
        .with_bucket_name(bucket_name)
        .build()
        .map_err(|e| IngestError::Source {
            message: format!("Failed to create S3 client for bucket '{}': {}", bucket_name, e),
        })?;

    Ok(Arc::new(store))
}

/// An input file read fully into memory.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub location: SourceLocation,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct SourceReader {
    max_bytes: u64,
}

impl SourceReader {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// Expands `location` into the files it names: itself when it points at a
    /// file, otherwise every `.csv` object below it in lexical order.
    pub async fn list(
        &self,
        location: &SourceLocation,
    ) -> Result<Vec<SourceLocation>, IngestError> {
        if location.is_file() {
            return Ok(vec![location.clone()]);
        }

        let (store, prefix) = location.open()?;
        let mut objects = Vec::new();
        let mut stream = store.list(Some(&prefix));
        while let Some(result) = stream.next().await {
            let meta = result?;
            let path: &str = meta.location.as_ref();
            if is_csv_path(path) {
                objects.push(location.sibling(&meta.location));
            } else {
                debug!("Skipping non-CSV object {}", path);
            }
        }

        if objects.is_empty() {
            return Err(IngestError::Source {
                message: format!("No files found in directory: {}", location),
            });
        }

        objects.sort_by_key(|object| object.to_string());
        info!("Found {} files under {}", objects.len(), location);
        Ok(objects)
    }

    /// Streams the object at `location` into memory, failing as soon as it
    /// grows past the configured limit.
    pub async fn read(&self, location: &SourceLocation) -> Result<SourceFile, IngestError> {
        let name = location.file_name().ok_or_else(|| IngestError::Source {
            message: format!("Source has no file name: {}", location),
        })?;

        let (store, object_path) = location.open()?;
        let get_result = store.get(&object_path).await.map_err(|e| IngestError::Source {
            message: format!("Failed to open source stream {}: {}", location, e),
        })?;

        let declared_size = get_result.meta.size as u64;
        if declared_size > self.max_bytes {
            return Err(self.too_large(location));
        }

        let mut buffer = BytesMut::with_capacity(declared_size as usize);
        let mut stream = get_result.into_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| IngestError::Source {
                message: format!("Failed to read chunk from source stream: {}", e),
            })?;

            if (buffer.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(self.too_large(location));
            }
            buffer.extend_from_slice(&chunk);
        }

        debug!("Read {} bytes from {}", buffer.len(), location);
        Ok(SourceFile {
            name,
            location: location.clone(),
            bytes: buffer.freeze(),
        })
    }

    fn too_large(&self, location: &SourceLocation) -> IngestError {
        IngestError::Source {
            message: format!(
                "Source {} is larger than the {} byte limit",
                location, self.max_bytes
            ),
        }
    }
}
