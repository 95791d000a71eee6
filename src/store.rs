use anyhow::{anyhow, Context, Result};
use chrono::{Local, SecondsFormat};
use image::RgbaImage;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: String,
    pub file: String,
    pub created_by: String,
    pub created_date: String,
    pub is_public: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PhotoIndex {
    #[serde(default)]
    next_id: u32,
    #[serde(default)]
    photos: Vec<PhotoRecord>,
}

/// Saved stills plus a TOML index beside them. Records carry the user
/// they were taken by; the store never interprets that value.
pub struct PhotoStore {
    root: PathBuf,
    index: PhotoIndex,
}

impl PhotoStore {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create photo directory {}", root.display()))?;
        let index_path = root.join("photos.toml");
        let index = if index_path.exists() {
            let text = std::fs::read_to_string(&index_path)
                .with_context(|| format!("Failed to read {}", index_path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("Failed to parse {}", index_path.display()))?
        } else {
            PhotoIndex {
                next_id: 1,
                photos: Vec::new(),
            }
        };
        Ok(Self {
            root: root.to_path_buf(),
            index,
        })
    }

    /// Losslessly saves a still and records who took it.
    pub fn save(&mut self, image: &RgbaImage, created_by: &str) -> Result<PhotoRecord> {
        let number = self.index.next_id.max(1);
        let timestamp = Local::now();
        let file = format!("photo_{:04}_{}.png", number, timestamp.format("%Y%m%d_%H%M%S"));
        let path = self.root.join(&file);
        image
            .save(&path)
            .with_context(|| format!("Failed to save photo to {}", path.display()))?;

        let record = PhotoRecord {
            id: format!("photo_{:04}", number),
            file,
            created_by: created_by.to_string(),
            created_date: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            is_public: false,
        };
        self.index.next_id = number + 1;
        self.index.photos.push(record.clone());
        self.persist()?;
        info!("Saved photo {} for {}", record.id, created_by);
        Ok(record)
    }

    /// Photos taken by `user`, newest first.
    pub fn list_by_user(&self, user: &str) -> Vec<&PhotoRecord> {
        let mut photos: Vec<&PhotoRecord> = self
            .index
            .photos
            .iter()
            .filter(|p| p.created_by == user)
            .collect();
        photos.sort_by(|a, b| {
            (&b.created_date, &b.id).cmp(&(&a.created_date, &a.id))
        });
        photos
    }

    pub fn photo_path(&self, record: &PhotoRecord) -> PathBuf {
        self.root.join(&record.file)
    }

    pub fn delete(&mut self, id: &str) -> Result<()> {
        let Some(position) = self.index.photos.iter().position(|p| p.id == id) else {
            return Err(anyhow!("No photo with id {}", id));
        };
        let record = self.index.photos.remove(position);
        let path = self.root.join(&record.file);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Could not remove {}: {}", path.display(), e);
        }
        self.persist()?;
        info!("Deleted photo {}", id);
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let index_path = self.root.join("photos.toml");
        let text = toml::to_string_pretty(&self.index).context("Failed to serialize photo index")?;
        std::fs::write(&index_path, text)
            .with_context(|| format!("Failed to write {}", index_path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundRecord {
    pub id: String,
    pub name: String,
    pub file: String,
    pub is_active: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BackgroundIndex {
    #[serde(default)]
    next_id: u32,
    #[serde(default)]
    backgrounds: Vec<BackgroundRecord>,
}

/// Backdrop images the live view can offer. On first run any images
/// already sitting in the directory are adopted as the starting set.
pub struct BackgroundLibrary {
    root: PathBuf,
    index: BackgroundIndex,
}

impl BackgroundLibrary {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).with_context(|| {
            format!("Failed to create background directory {}", root.display())
        })?;
        let index_path = root.join("backgrounds.toml");
        let mut library = if index_path.exists() {
            let text = std::fs::read_to_string(&index_path)
                .with_context(|| format!("Failed to read {}", index_path.display()))?;
            Self {
                root: root.to_path_buf(),
                index: toml::from_str(&text)
                    .with_context(|| format!("Failed to parse {}", index_path.display()))?,
            }
        } else {
            Self {
                root: root.to_path_buf(),
                index: BackgroundIndex {
                    next_id: 1,
                    backgrounds: Vec::new(),
                },
            }
        };
        library.seed()?;
        Ok(library)
    }

    /// Adopts loose images found in the directory on first run.
    fn seed(&mut self) -> Result<()> {
        if !self.index.backgrounds.is_empty() {
            return Ok(());
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list {}", self.root.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
                .unwrap_or(false);
            if path.is_file() && is_image {
                found.push(path);
            }
        }
        if found.is_empty() {
            return Ok(());
        }
        found.sort();
        for path in found {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Background".to_string());
            let file = path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let record = BackgroundRecord {
                id: format!("bg_{:03}", self.index.next_id.max(1)),
                name,
                file,
                is_active: true,
            };
            self.index.next_id = self.index.next_id.max(1) + 1;
            self.index.backgrounds.push(record);
        }
        info!(
            "Seeded background library with {} images",
            self.index.backgrounds.len()
        );
        self.persist()
    }

    pub fn active(&self) -> Vec<&BackgroundRecord> {
        self.index
            .backgrounds
            .iter()
            .filter(|b| b.is_active)
            .collect()
    }

    pub fn background_path(&self, record: &BackgroundRecord) -> PathBuf {
        self.root.join(&record.file)
    }

    /// Copies an image chosen by the operator into the library and
    /// activates it.
    pub fn add_from_file(&mut self, source: &Path) -> Result<BackgroundRecord> {
        let number = self.index.next_id.max(1);
        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
            .to_ascii_lowercase();
        let name = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("Background {}", number));
        let file = format!("bg_{:03}.{}", number, extension);
        let dest = self.root.join(&file);
        std::fs::copy(source, &dest).with_context(|| {
            format!(
                "Failed to copy {} into the background library",
                source.display()
            )
        })?;

        let record = BackgroundRecord {
            id: format!("bg_{:03}", number),
            name,
            file,
            is_active: true,
        };
        self.index.next_id = number + 1;
        self.index.backgrounds.push(record.clone());
        self.persist()?;
        info!("Added background {} ({})", record.id, record.name);
        Ok(record)
    }

    /// Synchronous decode; the UI runs this on a spawned task and hands
    /// the result back over a channel.
    pub fn load(&self, record: &BackgroundRecord) -> Result<RgbaImage> {
        let path = self.background_path(record);
        let image = image::open(&path)
            .with_context(|| format!("Failed to load background {}", path.display()))?;
        Ok(image.to_rgba8())
    }

    fn persist(&self) -> Result<()> {
        let index_path = self.root.join("backgrounds.toml");
        let text =
            toml::to_string_pretty(&self.index).context("Failed to serialize background index")?;
        std::fs::write(&index_path, text)
            .with_context(|| format!("Failed to write {}", index_path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::TempDir;

    fn sample_image(value: u8) -> RgbaImage {
        RgbaImage::from_pixel(4, 4, Rgba([value, value, value, 255]))
    }

    #[test]
    fn test_save_writes_file_and_record() {
        let dir = TempDir::new().unwrap();
        let mut store = PhotoStore::new(dir.path()).unwrap();
        let record = store.save(&sample_image(50), "alice").unwrap();

        assert!(store.photo_path(&record).exists());
        assert_eq!(record.created_by, "alice");
        assert!(!record.is_public);
        assert_eq!(store.list_by_user("alice").len(), 1);
    }

    #[test]
    fn test_listing_is_per_user_and_newest_first() {
        let dir = TempDir::new().unwrap();
        let mut store = PhotoStore::new(dir.path()).unwrap();
        let first = store.save(&sample_image(10), "alice").unwrap();
        let second = store.save(&sample_image(20), "alice").unwrap();
        store.save(&sample_image(30), "bob").unwrap();

        let listed = store.list_by_user("alice");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
        assert_eq!(store.list_by_user("carol").len(), 0);
    }

    #[test]
    fn test_delete_removes_file_and_record() {
        let dir = TempDir::new().unwrap();
        let mut store = PhotoStore::new(dir.path()).unwrap();
        let record = store.save(&sample_image(10), "alice").unwrap();
        let path = store.photo_path(&record);

        store.delete(&record.id).unwrap();
        assert!(!path.exists());
        assert!(store.list_by_user("alice").is_empty());
        assert!(store.delete(&record.id).is_err());
    }

    #[test]
    fn test_index_survives_reopen_without_id_reuse() {
        let dir = TempDir::new().unwrap();
        let first_id;
        {
            let mut store = PhotoStore::new(dir.path()).unwrap();
            first_id = store.save(&sample_image(10), "alice").unwrap().id;
            let second = store.save(&sample_image(20), "alice").unwrap();
            store.delete(&second.id).unwrap();
        }
        let mut store = PhotoStore::new(dir.path()).unwrap();
        assert_eq!(store.list_by_user("alice").len(), 1);
        let third = store.save(&sample_image(30), "alice").unwrap();
        assert_ne!(third.id, first_id);
        assert_eq!(third.id, "photo_0003");
    }

    #[test]
    fn test_library_seeds_loose_images_once() {
        let dir = TempDir::new().unwrap();
        sample_image(10).save(dir.path().join("beach.png")).unwrap();
        sample_image(20).save(dir.path().join("city.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let library = BackgroundLibrary::new(dir.path()).unwrap();
        let active = library.active();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].name, "beach");

        // Reopening must not duplicate the seeded records.
        drop(library);
        let library = BackgroundLibrary::new(dir.path()).unwrap();
        assert_eq!(library.active().len(), 2);
    }

    #[test]
    fn test_add_from_file_copies_and_activates() {
        let source_dir = TempDir::new().unwrap();
        let source = source_dir.path().join("sunset.png");
        sample_image(200).save(&source).unwrap();

        let dir = TempDir::new().unwrap();
        let mut library = BackgroundLibrary::new(dir.path()).unwrap();
        let record = library.add_from_file(&source).unwrap();

        assert!(library.background_path(&record).exists());
        assert!(record.is_active);
        assert_eq!(record.name, "sunset");
        assert_eq!(record.file, "bg_001.png");
        assert_eq!(library.active().len(), 1);
        assert_eq!(library.load(&record).unwrap().get_pixel(0, 0)[0], 200);
    }

    #[test]
    fn test_load_decodes_library_image() {
        let dir = TempDir::new().unwrap();
        sample_image(80).save(dir.path().join("studio.png")).unwrap();
        let library = BackgroundLibrary::new(dir.path()).unwrap();
        let record = library.active()[0].clone();
        let image = library.load(&record).unwrap();
        assert_eq!(image.dimensions(), (4, 4));
        assert_eq!(image.get_pixel(0, 0)[0], 80);
    }
}
