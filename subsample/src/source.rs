//! Re-openable byte sources
//!
//! A bounded decode reads its input twice (bounds probe, then full decode), so
//! sources hand out a fresh stream positioned at the start of the image on every
//! [`ByteSource::open`]. Streams close when dropped.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

/// Readable, seekable stream the codec can sniff and parse
pub trait ImageStream: BufRead + Seek {}

impl<T: BufRead + Seek + ?Sized> ImageStream for T {}

pub trait ByteSource {
    /// Open a new stream over the image bytes
    fn open(&self) -> io::Result<Box<dyn ImageStream + '_>>;

    /// Short human-readable name used in logs and errors
    fn describe(&self) -> String;
}

impl<S: ByteSource + ?Sized> ByteSource for &S {
    fn open(&self) -> io::Result<Box<dyn ImageStream + '_>> {
        (**self).open()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn open(&self) -> io::Result<Box<dyn ImageStream + '_>> {
        (**self).open()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// In-memory buffer, optionally restricted to a window
#[derive(Debug, Clone)]
pub struct BytesSource<'a> {
    data: Cow<'a, [u8]>,
    offset: usize,
    length: Option<usize>,
}

impl<'a> BytesSource<'a> {
    pub fn new(data: impl Into<Cow<'a, [u8]>>) -> Self {
        Self {
            data: data.into(),
            offset: 0,
            length: None,
        }
    }

    /// Only expose `length` bytes starting at `offset`
    pub fn with_range(mut self, offset: usize, length: usize) -> Self {
        self.offset = offset;
        self.length = Some(length);
        self
    }

    fn window(&self) -> io::Result<&[u8]> {
        let end = match self.length {
            Some(length) => self.offset.checked_add(length),
            None => Some(self.data.len()),
        };

        end.filter(|&end| self.offset <= end && end <= self.data.len())
            .map(|end| &self.data[self.offset..end])
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "range {}+{:?} outside buffer of {} bytes",
                        self.offset,
                        self.length,
                        self.data.len()
                    ),
                )
            })
    }
}

impl ByteSource for BytesSource<'_> {
    fn open(&self) -> io::Result<Box<dyn ImageStream + '_>> {
        Ok(Box::new(Cursor::new(self.window()?)))
    }

    fn describe(&self) -> String {
        format!("{} byte buffer", self.length.unwrap_or(self.data.len()))
    }
}

/// Image file on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn open(&self) -> io::Result<Box<dyn ImageStream + '_>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Already-open file handle.
///
/// The handle's position when the source is created marks the start of the
/// image; every open duplicates the handle and seeks back there.
#[derive(Debug)]
pub struct DescriptorSource {
    file: File,
    start: u64,
}

impl DescriptorSource {
    pub fn new(mut file: File) -> io::Result<Self> {
        let start = file.stream_position()?;
        Ok(Self { file, start })
    }

    #[cfg(unix)]
    pub fn from_fd(fd: std::os::fd::OwnedFd) -> io::Result<Self> {
        Self::new(File::from(fd))
    }
}

impl ByteSource for DescriptorSource {
    fn open(&self) -> io::Result<Box<dyn ImageStream + '_>> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(self.start))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn describe(&self) -> String {
        format!("{} at offset {}", handle_name(&self.file), self.start)
    }
}

#[cfg(unix)]
fn handle_name(file: &File) -> String {
    use std::os::fd::AsRawFd;
    format!("fd {}", file.as_raw_fd())
}

#[cfg(not(unix))]
fn handle_name(_file: &File) -> String {
    "file handle".to_string()
}

pub type ResourceId = u32;

/// Packaged resources addressed by numeric id
pub trait Resources {
    fn open_resource(&self, id: ResourceId) -> io::Result<Box<dyn ImageStream + '_>>;
}

/// Resource table held in memory
#[derive(Debug, Clone, Default)]
pub struct ResourceBundle {
    entries: HashMap<ResourceId, Vec<u8>>,
}

impl ResourceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ResourceId, bytes: Vec<u8>) -> Option<Vec<u8>> {
        self.entries.insert(id, bytes)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn source(&self, id: ResourceId) -> ResourceSource<'_, Self> {
        ResourceSource::new(self, id)
    }
}

impl FromIterator<(ResourceId, Vec<u8>)> for ResourceBundle {
    fn from_iter<I: IntoIterator<Item = (ResourceId, Vec<u8>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Resources for ResourceBundle {
    fn open_resource(&self, id: ResourceId) -> io::Result<Box<dyn ImageStream + '_>> {
        let bytes = self.entries.get(&id).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no resource {id:#x}"))
        })?;
        Ok(Box::new(Cursor::new(bytes.as_slice())))
    }
}

/// One resource from a [`Resources`] provider
pub struct ResourceSource<'r, R: Resources + ?Sized> {
    resources: &'r R,
    id: ResourceId,
}

impl<'r, R: Resources + ?Sized> ResourceSource<'r, R> {
    pub fn new(resources: &'r R, id: ResourceId) -> Self {
        Self { resources, id }
    }
}

impl<R: Resources + ?Sized> ByteSource for ResourceSource<'_, R> {
    fn open(&self) -> io::Result<Box<dyn ImageStream + '_>> {
        self.resources.open_resource(self.id)
    }

    fn describe(&self) -> String {
        format!("resource {:#x}", self.id)
    }
}

/// Directory of named assets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDir {
    root: PathBuf,
}

impl AssetDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Source for the asset `name`, a relative path that stays inside the directory
    pub fn source(&self, name: &str) -> io::Result<FileSource> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

        if name.is_empty() || escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid asset name: {name}"),
            ));
        }

        Ok(FileSource::new(self.root.join(relative)))
    }
}

/// Caller-supplied stream factory (network response, content provider, ...).
///
/// The stream does not need to be seekable: each open reads it to the end into
/// memory and closes it before handing the bytes to the codec. Streams longer
/// than the size limit fail to open.
pub struct StreamSource<F> {
    name: String,
    factory: F,
    max_bytes: u64,
}

impl<F> StreamSource<F> {
    /// Default cap on buffered stream bytes
    pub const DEFAULT_MAX_BYTES: u64 = 256 * 1024 * 1024;

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

impl<F, R> StreamSource<F>
where
    F: Fn() -> io::Result<R>,
    R: Read,
{
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            name: name.into(),
            factory,
            max_bytes: Self::DEFAULT_MAX_BYTES,
        }
    }
}

impl<F, R> ByteSource for StreamSource<F>
where
    F: Fn() -> io::Result<R>,
    R: Read,
{
    fn open(&self) -> io::Result<Box<dyn ImageStream + '_>> {
        let reader = (self.factory)()?;
        let mut buffer = Vec::new();
        // one byte past the limit tells a full stream from an overlong one
        reader
            .take(self.max_bytes.saturating_add(1))
            .read_to_end(&mut buffer)?;

        if buffer.len() as u64 > self.max_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is longer than {} bytes", self.name, self.max_bytes),
            ));
        }

        log::trace!("Buffered {} bytes from {}", buffer.len(), self.name);
        Ok(Box::new(Cursor::new(buffer)))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
