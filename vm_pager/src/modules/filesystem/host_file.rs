use std::{
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    path::PathBuf,
    sync::Arc,
};

use spin::Mutex;

use super::{BackingFile, FileHandle};

/// File on the host filesystem
pub struct HostFile {
    file: Mutex<File>,

    /// kept for `reopen`
    path: PathBuf,

    /// files do not grow, so the length is fixed at open
    length: usize,
}

impl HostFile {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<FileHandle> {
        let path = path.into();
        let file = File::options().read(true).write(true).open(&path)?;
        let length = file.metadata()?.len() as usize;

        Ok(Arc::new(HostFile {
            file: Mutex::new(file),
            path,
            length,
        }))
    }
}

impl BackingFile for HostFile {
    fn read_at(&self, offset: usize, dest: &mut [u8]) -> usize {
        if offset >= self.length {
            return 0;
        }
        let len = dest.len().min(self.length - offset);

        let mut file = self.file.lock();
        if file.seek(SeekFrom::Start(offset as u64)).is_err() {
            return 0;
        }

        let mut done = 0;
        while done < len {
            match file.read(&mut dest[done..len]) {
                Ok(0) | Err(_) => break,
                Ok(n) => done += n,
            }
        }
        done
    }

    fn write_at(&self, offset: usize, src: &[u8]) -> usize {
        if offset >= self.length {
            return 0;
        }
        let len = src.len().min(self.length - offset);

        let mut file = self.file.lock();
        if file.seek(SeekFrom::Start(offset as u64)).is_err() {
            return 0;
        }

        match file.write_all(&src[..len]) {
            Ok(()) => len,
            Err(_) => 0,
        }
    }

    fn length(&self) -> usize {
        self.length
    }

    fn reopen(&self) -> Result<FileHandle, ()> {
        HostFile::open(self.path.clone()).map_err(|_| ())
    }
}

#[cfg(test)]
mod test {
    use std::fs::{remove_file, write};

    use super::HostFile;

    #[test]
    fn test_host_file_read_write() {
        let path = "/tmp/test_host_file_read_write.tmp";
        write(path, [1u8; 100]).unwrap();

        let file = HostFile::open(path).unwrap();
        assert_eq!(file.length(), 100);

        assert_eq!(file.write_at(90, &[5u8; 20]), 10);

        let other = file.reopen().unwrap();
        let mut buffer = [0u8; 20];
        assert_eq!(other.read_at(85, &mut buffer), 15);
        assert_eq!(&buffer[..5], &[1u8; 5]);
        assert_eq!(&buffer[5..15], &[5u8; 10]);

        drop(file);
        drop(other);
        let _ = remove_file(path);
    }
}
