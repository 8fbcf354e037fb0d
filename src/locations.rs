//! Named data locations, loaded once at start-up from a JSON file.

use crate::error::SdsError;

use expanduser::expanduser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{event, Level};
use url::Url;

/// Where the files of a location live.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LocationKind {
    /// A directory on the local file system.
    Local { path: String },
    /// A bucket in S3-compatible object storage. `path` is a key prefix.
    S3 {
        url: Url,
        bucket: String,
        #[serde(default)]
        path: String,
        access_key: Option<String>,
        secret_key: Option<String>,
    },
}

impl LocationKind {
    fn type_name(&self) -> &'static str {
        match self {
            LocationKind::Local { .. } => "local",
            LocationKind::S3 { .. } => "s3",
        }
    }
}

/// A named location.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Location {
    pub name: String,
    #[serde(flatten)]
    pub kind: LocationKind,
}

impl Location {
    /// Local directory of a `local` location, with `~` expanded.
    pub fn local_root(&self) -> Option<PathBuf> {
        match &self.kind {
            LocationKind::Local { path } => {
                Some(expanduser(path).unwrap_or_else(|_| PathBuf::from(path)))
            }
            LocationKind::S3 { .. } => None,
        }
    }
}

/// Public view of a location, as listed by the file system endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LocationSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl From<&Location> for LocationSummary {
    fn from(location: &Location) -> Self {
        LocationSummary {
            name: location.name.clone(),
            kind: location.kind.type_name(),
        }
    }
}

#[derive(Deserialize)]
struct LocationsFile {
    locations: Vec<Location>,
}

/// The configured locations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Locations {
    locations: Vec<Location>,
}

impl Locations {
    pub fn new(locations: Vec<Location>) -> Self {
        Locations { locations }
    }

    /// Load locations from a JSON file. A missing file yields no locations.
    pub fn load(path: &str) -> Result<Self, SdsError> {
        let path = expanduser(path).unwrap_or_else(|_| PathBuf::from(path));
        match std::fs::read_to_string(&path) {
            Ok(json) => Self::from_json(&json, &path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                event!(
                    Level::WARN,
                    "Locations file {} not found, no locations configured",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Parse locations from JSON. `path` is only used in error messages.
    pub fn from_json(json: &str, path: &Path) -> Result<Self, SdsError> {
        let file: LocationsFile =
            serde_json::from_str(json).map_err(|source| SdsError::LocationsParse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::new(file.locations))
    }

    /// Look up a location by name.
    pub fn find(&self, name: &str) -> Result<&Location, SdsError> {
        self.locations
            .iter()
            .find(|location| location.name == name)
            .ok_or_else(|| SdsError::UnknownLocation {
                location: name.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "locations": [
            {"name": "TestDir", "type": "local", "path": "/data"},
            {
                "name": "Remote",
                "type": "s3",
                "url": "http://localhost:9000",
                "bucket": "sds",
                "access_key": "minioadmin",
                "secret_key": "minioadmin"
            }
        ]
    }"#;

    #[test]
    fn parse_locations() {
        let locations = Locations::from_json(JSON, Path::new("test.json")).unwrap();
        let local = locations.find("TestDir").unwrap();
        assert_eq!(
            LocationKind::Local {
                path: "/data".to_string()
            },
            local.kind
        );
        assert_eq!(Some(PathBuf::from("/data")), local.local_root());
        match &locations.find("Remote").unwrap().kind {
            LocationKind::S3 {
                url, bucket, path, ..
            } => {
                assert_eq!("http://localhost:9000/", url.as_str());
                assert_eq!("sds", bucket);
                assert_eq!("", path);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn unknown_location() {
        let locations = Locations::from_json(JSON, Path::new("test.json")).unwrap();
        match locations.find("Missing") {
            Err(SdsError::UnknownLocation { location }) => assert_eq!("Missing", location),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn summaries_hide_details() {
        let locations = Locations::from_json(JSON, Path::new("test.json")).unwrap();
        let summaries: Vec<LocationSummary> = locations.iter().map(Into::into).collect();
        assert_eq!(
            r#"[{"name":"TestDir","type":"local"},{"name":"Remote","type":"s3"}]"#,
            serde_json::to_string(&summaries).unwrap()
        );
    }

    #[test]
    fn invalid_json() {
        match Locations::from_json(r#"{"locations": [{"name": "x"}]}"#, Path::new("bad.json")) {
            Err(SdsError::LocationsParse { path, .. }) => assert_eq!("bad.json", path),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let locations = Locations::load(path.to_str().unwrap()).unwrap();
        assert_eq!(0, locations.iter().count());
    }

    #[test]
    fn load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locations.json");
        std::fs::write(&path, JSON).unwrap();
        let locations = Locations::load(path.to_str().unwrap()).unwrap();
        assert_eq!(2, locations.iter().count());
    }
}
