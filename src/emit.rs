//! Serialization of finalized images and staged writing of the resulting files

use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ihex::Record;
use log::{debug, info, warn};
use tempfile::{NamedTempFile, TempPath};

use crate::image::{Image, StartAddress};
use crate::Error;

/// Number of data bytes per hex record
const HEX_RECORD_SIZE: usize = 16;

/// Number of bytes per line in the C array
const C_ARRAY_BYTES_PER_LINE: usize = 0x20;

/// Mode of written files on unix, temporary files are created owner-only
#[cfg(unix)]
const OUTPUT_FILE_MODE: u32 = 0o644;

/// Renders `image` as Intel HEX, covering exactly the address range of the image
pub fn to_hex(image: &Image) -> Result<String, Error> {
    let mut records = Vec::with_capacity(image.len() as usize / HEX_RECORD_SIZE + 4);
    let mut upper: u16 = 0;

    match image.start_address() {
        Some(StartAddress::Segment { cs, ip }) => {
            records.push(Record::StartSegmentAddress { cs, ip })
        }
        Some(StartAddress::Linear(address)) => records.push(Record::StartLinearAddress(address)),
        None => (),
    }

    let bytes = image.as_bytes();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let address = image.base_address() + offset as u32;
        let address_upper = (address >> 16) as u16;
        let address_lower = address as u16;

        if address_upper != upper {
            records.push(Record::ExtendedLinearAddress(address_upper));
            upper = address_upper;
        }

        // Records never cross a 64 KiB boundary
        let room = 0x1_0000 - usize::from(address_lower);
        let size = HEX_RECORD_SIZE.min(room).min(bytes.len() - offset);

        records.push(Record::Data {
            offset: address_lower,
            value: bytes[offset..offset + size].to_vec(),
        });

        offset += size;
    }

    records.push(Record::EndOfFile);

    let mut hex = ihex::create_object_file_representation(&records)?;

    if !hex.ends_with('\n') {
        hex.push('\n');
    }

    Ok(hex)
}

/// The raw bytes of `image`
pub fn to_bin(image: &Image) -> Vec<u8> {
    image.as_bytes().to_vec()
}

/// Formats a crc the way the release tooling reads it back
pub fn crc_text(crc: u32) -> String {
    format!("0x{:08x}\r\n", crc)
}

/// Renders `image` as C source for embedding it into another firmware
pub fn to_c_array(image: &Image) -> String {
    let bytes = image.as_bytes();
    // Every byte takes six characters ("0xff, ") plus some slack for the line breaks
    let mut source = String::with_capacity(bytes.len() * 7 + 256);

    let _ = write!(
        source,
        "static const unsigned int image_start = 0x{:08x};\n\
         static const unsigned int image_size = 0x{:08x};\n\
         static const char image_data[0x{:08x}] = {{\n    ",
        image.base_address(),
        image.len(),
        image.len()
    );

    for (i, byte) in bytes.iter().enumerate() {
        let _ = write!(source, "0x{:02x}, ", byte);

        if (i + 1) % C_ARRAY_BYTES_PER_LINE == 0 {
            source.push_str("\n    ");
        }
    }

    source.push_str("};\n");
    source
}

/// A file that will be written once the whole run succeeded
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

/// The complete set of files produced by one finalization run
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Artifacts {
    files: Vec<Artifact>,
}

impl Artifacts {
    pub fn new() -> Artifacts {
        Artifacts::default()
    }

    /// Queues `contents` to be written to `path`, replacing an earlier entry for the same path
    pub fn push<P: Into<PathBuf>, C: Into<Vec<u8>>>(&mut self, path: P, contents: C) {
        let path = path.into();
        let contents = contents.into();

        match self.files.iter_mut().find(|file| file.path == path) {
            Some(file) => file.contents = contents,
            None => self.files.push(Artifact { path, contents }),
        }
    }

    pub fn get<P: AsRef<Path>>(&self, path: P) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|file| file.path == path.as_ref())
            .map(|file| file.contents.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.files.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|file| file.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Writes every artifact to disk
    ///
    /// All files are first written to temporary files next to their destination. Existing
    /// destinations are then moved aside and the temporaries renamed into place. If any step
    /// fails, the files written so far are removed and the previous ones restored.
    pub fn persist(&self) -> Result<(), Error> {
        let mut staged = Vec::with_capacity(self.files.len());

        for file in &self.files {
            let dir = destination_dir(&file.path);

            fs::create_dir_all(dir)?;

            let mut tmp = NamedTempFile::new_in(dir)?;
            tmp.write_all(&file.contents)?;
            tmp.flush()?;
            set_output_permissions(tmp.as_file())?;

            debug!(
                "Staged {} bytes for {} in {}",
                file.contents.len(),
                file.path.display(),
                tmp.path().display()
            );

            staged.push((tmp, file.path.as_path()));
        }

        let mut backups = Vec::new();

        for (_, path) in &staged {
            match back_up(path) {
                Ok(Some(backup)) => backups.push((backup, *path)),
                Ok(None) => (),
                Err(err) => {
                    roll_back(&[], backups);
                    return Err(err);
                }
            }
        }

        let mut written = Vec::with_capacity(staged.len());

        for (tmp, path) in staged {
            if let Err(err) = tmp.persist(path) {
                warn!("Could not write {}: {}", path.display(), err.error);
                roll_back(&written, backups);
                return Err(err.error.into());
            }

            written.push(path);
        }

        for path in &written {
            info!("Wrote {}", path.display());
        }

        Ok(())
    }
}

fn destination_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn set_output_permissions(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    file.set_permissions(fs::Permissions::from_mode(OUTPUT_FILE_MODE))
}

#[cfg(not(unix))]
fn set_output_permissions(_file: &fs::File) -> io::Result<()> {
    Ok(())
}

/// Moves an existing file at `path` to a temporary path in the same directory
///
/// The backup is deleted when the returned `TempPath` is dropped.
fn back_up(path: &Path) -> Result<Option<TempPath>, Error> {
    match fs::symlink_metadata(path) {
        Ok(_) => (),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let backup = NamedTempFile::new_in(destination_dir(path))?.into_temp_path();
    fs::rename(path, &backup)?;

    debug!("Moved {} to {}", path.display(), backup.display());

    Ok(Some(backup))
}

/// Removes the files in `written` and moves every backup back to its original path
fn roll_back(written: &[&Path], backups: Vec<(TempPath, &Path)>) {
    for path in written {
        if let Err(err) = fs::remove_file(path) {
            warn!("Could not remove {}: {}", path.display(), err);
        }
    }

    for (backup, path) in backups {
        if let Err(err) = fs::rename(&backup, path) {
            warn!(
                "Could not restore {} from {}: {}",
                path.display(),
                backup.display(),
                err
            );
        }
    }
}
