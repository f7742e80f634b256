//! Package resolution across files.
//!
//! A SourceClip references a package by UMID. The resolver knows every
//! package of every opened file and, when a reference points outside the
//! known set, opens companion files named by descriptor locators. Companion
//! readers are owned by the resolver; the file readers address them by
//! [`FileId`].

use crate::byte_source::{ByteSource, FileByteSource};
use crate::error::Result;
use crate::file_index::{FileId, FileIndex, McaLabelIndex};
use crate::metadata::{HeaderMetadata, SetId};
use crate::reader::FileReader;
use mxfclip_core::Umid;
use std::path::{Path, PathBuf};
use url::Url;

/// A source clip reference to resolve.
#[derive(Debug, Clone, Copy)]
pub struct SourceClipRef {
    pub source_package_uid: Umid,
    pub source_track_id: u32,
}

/// One resolution candidate.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedPackage {
    /// File hosting the package description.
    pub file_id: FileId,
    /// The package set.
    pub package: SetId,
    /// The referenced track set within the package.
    pub track: SetId,
    /// The referenced track id.
    pub track_id: u32,
    /// Whether the package is a file source package.
    pub is_file_source_package: bool,
    /// Whether the package describes essence stored outside the file that
    /// declares it.
    pub external_essence: bool,
}

/// Opens byte sources for companion files.
pub trait FileFactory {
    /// Open the file at `path` for reading.
    fn open_read(&mut self, path: &Path) -> Result<Box<dyn ByteSource>>;
}

/// Opens plain files from the local filesystem.
#[derive(Debug, Default)]
pub struct DefaultFileFactory;

impl FileFactory for DefaultFileFactory {
    fn open_read(&mut self, path: &Path) -> Result<Box<dyn ByteSource>> {
        Ok(Box::new(FileByteSource::open(path)?))
    }
}

/// Resolves source clip references and owns companion file readers.
pub trait PackageResolver {
    /// Register the packages of a newly opened file.
    fn extract_packages(&mut self, file_id: FileId, metadata: &HeaderMetadata);

    /// Resolve a source clip against the known packages, candidates from
    /// the origin file first.
    fn resolve_source_clip(&mut self, origin: FileId, clip: &SourceClipRef) -> Vec<ResolvedPackage>;

    /// Resolve a source clip, opening companion files from `locators` when
    /// the known packages do not match.
    fn resolve_source_clip_with_locators(
        &mut self,
        origin: FileId,
        clip: &SourceClipRef,
        locators: &[String],
    ) -> Vec<ResolvedPackage>;

    /// A companion reader by file id.
    fn external_reader(&self, file_id: FileId) -> Option<&FileReader>;

    /// A companion reader by file id, mutably.
    fn external_reader_mut(&mut self, file_id: FileId) -> Option<&mut FileReader>;

    /// The shared file registry.
    fn file_index(&self) -> &FileIndex;

    /// The shared file registry, mutably.
    fn file_index_mut(&mut self) -> &mut FileIndex;

    /// The shared MCA label registry.
    fn mca_label_index(&mut self) -> &mut McaLabelIndex;
}

#[derive(Debug, Clone)]
struct RegisteredPackage {
    file_id: FileId,
    umid: Umid,
    set_id: SetId,
    is_file_source_package: bool,
    has_internal_essence: bool,
    tracks: Vec<(u32, SetId)>,
}

/// The standard resolver.
pub struct DefaultPackageResolver {
    file_index: FileIndex,
    mca_index: McaLabelIndex,
    file_factory: Box<dyn FileFactory>,
    packages: Vec<RegisteredPackage>,
    external_readers: Vec<(FileId, FileReader)>,
}

impl Default for DefaultPackageResolver {
    fn default() -> Self {
        Self::new(Box::new(DefaultFileFactory))
    }
}

impl DefaultPackageResolver {
    /// Create a resolver using the given factory for companion files.
    pub fn new(file_factory: Box<dyn FileFactory>) -> Self {
        Self {
            file_index: FileIndex::new(),
            mca_index: McaLabelIndex::new(),
            file_factory,
            packages: Vec::new(),
            external_readers: Vec::new(),
        }
    }

    fn lookup(&self, origin: FileId, clip: &SourceClipRef) -> Vec<ResolvedPackage> {
        let mut candidates: Vec<ResolvedPackage> = Vec::new();
        for package in &self.packages {
            if package.umid != clip.source_package_uid {
                continue;
            }
            let track = match package
                .tracks
                .iter()
                .find(|(track_id, _)| *track_id == clip.source_track_id)
            {
                Some(&(track_id, set_id)) => (track_id, set_id),
                None => continue,
            };
            candidates.push(ResolvedPackage {
                file_id: package.file_id,
                package: package.set_id,
                track: track.1,
                track_id: track.0,
                is_file_source_package: package.is_file_source_package,
                external_essence: package.is_file_source_package && !package.has_internal_essence,
            });
        }
        // origin-file candidates take precedence
        candidates.sort_by_key(|c| c.file_id != origin);
        candidates
    }

    fn open_companion(&mut self, path: &Path) -> Result<()> {
        let source = self.file_factory.open_read(path)?;
        let reader = FileReader::open_companion(source, path, self)?;
        self.external_readers.push((reader.file_id(), reader));
        Ok(())
    }

    fn origin_directory(&self, origin: FileId) -> Option<PathBuf> {
        let entry = self.file_index.entry(origin)?;
        let path = if let Ok(url) = Url::parse(&entry.absolute_uri) {
            url.to_file_path().ok()?
        } else {
            PathBuf::from(&entry.filename)
        };
        path.parent().map(Path::to_path_buf)
    }
}

impl PackageResolver for DefaultPackageResolver {
    fn extract_packages(&mut self, file_id: FileId, metadata: &HeaderMetadata) {
        let ecd_links: Vec<Umid> = metadata
            .essence_container_data()
            .map(|entries| entries.iter().map(|e| e.linked_package_uid).collect())
            .unwrap_or_default();

        let mut register = |set_id: SetId, is_file_source: bool| {
            let package = match metadata.package(set_id) {
                Some(package) => package,
                None => return,
            };
            if self
                .packages
                .iter()
                .any(|p| p.file_id == file_id && p.set_id == set_id)
            {
                return;
            }
            let tracks = metadata
                .package_tracks(set_id)
                .into_iter()
                .filter_map(|track_set| {
                    metadata
                        .track(track_set)
                        .and_then(|t| t.track_id)
                        .map(|track_id| (track_id, track_set))
                })
                .collect();
            self.packages.push(RegisteredPackage {
                file_id,
                umid: package.package_uid,
                set_id,
                is_file_source_package: is_file_source,
                has_internal_essence: ecd_links.contains(&package.package_uid),
                tracks,
            });
        };

        if let Some(material) = metadata.material_package() {
            register(material, false);
        }
        for set_id in metadata.file_source_packages() {
            register(set_id, true);
        }
    }

    fn resolve_source_clip(&mut self, origin: FileId, clip: &SourceClipRef) -> Vec<ResolvedPackage> {
        self.lookup(origin, clip)
    }

    fn resolve_source_clip_with_locators(
        &mut self,
        origin: FileId,
        clip: &SourceClipRef,
        locators: &[String],
    ) -> Vec<ResolvedPackage> {
        // a candidate only settles the resolution if its file actually
        // hosts the essence; the origin file's own copy of an external
        // package does not
        fn has_host(candidates: &[ResolvedPackage]) -> bool {
            candidates
                .iter()
                .any(|p| p.is_file_source_package && !p.external_essence)
        }

        let resolved = self.lookup(origin, clip);
        if has_host(&resolved) || locators.is_empty() {
            return resolved;
        }

        let origin_dir = self.origin_directory(origin);
        for locator in locators {
            let path = match locator_to_path(locator, origin_dir.as_deref()) {
                Some(path) => path,
                None => {
                    log::debug!("Ignoring unusable locator '{}'", locator);
                    continue;
                }
            };
            match self.open_companion(&path) {
                Ok(()) => {
                    let resolved = self.lookup(origin, clip);
                    if has_host(&resolved) {
                        return resolved;
                    }
                }
                Err(e) => {
                    log::warn!("Failed to open companion file '{}': {}", path.display(), e);
                }
            }
        }

        self.lookup(origin, clip)
    }

    fn external_reader(&self, file_id: FileId) -> Option<&FileReader> {
        self.external_readers
            .iter()
            .find(|(id, _)| *id == file_id)
            .map(|(_, reader)| reader)
    }

    fn external_reader_mut(&mut self, file_id: FileId) -> Option<&mut FileReader> {
        self.external_readers
            .iter_mut()
            .find(|(id, _)| *id == file_id)
            .map(|(_, reader)| reader)
    }

    fn file_index(&self) -> &FileIndex {
        &self.file_index
    }

    fn file_index_mut(&mut self) -> &mut FileIndex {
        &mut self.file_index
    }

    fn mca_label_index(&mut self) -> &mut McaLabelIndex {
        &mut self.mca_index
    }
}

/// Map a locator string onto a filesystem path, resolving relative paths
/// against the origin file's directory.
fn locator_to_path(locator: &str, origin_dir: Option<&Path>) -> Option<PathBuf> {
    if let Ok(url) = Url::parse(locator) {
        return match url.scheme() {
            "file" => url.to_file_path().ok(),
            // network sources are not local companion files
            _ => None,
        };
    }

    let path = PathBuf::from(locator);
    if path.is_absolute() {
        Some(path)
    } else {
        origin_dir.map(|dir| dir.join(path))
    }
}
