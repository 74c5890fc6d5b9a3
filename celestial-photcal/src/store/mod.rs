//! Local catalog cache: an id-keyed table of catalog rows with a HEALPix
//! bucket index for region queries.
//!
//! The store lives either in memory or in a single file. File-backed stores
//! commit each batch atomically: writers serialize on a sidecar lock, merge
//! whatever other processes committed, write the full table to a temporary
//! file, sync it, and rename it over the data file. Readers see either the
//! old or the new table, never a torn one.
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`EntryStore`] | insert-or-ignore, region query and count, refresh from disk |
//! | [`CatalogEntry`], [`CatalogId`], [`Photometry`] | row types |

mod entry;
mod format;
mod lock;

pub use entry::{CatalogEntry, CatalogId, Photometry};

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::sky::healpix::{self, MAX_ORDER};
use crate::sky::Region;

use lock::{sibling, WriteLock};

pub const DEFAULT_INDEX_ORDER: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Backing {
    Memory,
    File(PathBuf),
}

#[derive(Debug)]
pub struct EntryStore {
    backing: Backing,
    order: u32,
    entries: BTreeMap<CatalogId, CatalogEntry>,
    index: BTreeMap<u64, Vec<CatalogId>>,
    bands: BTreeSet<String>,
}

impl EntryStore {
    pub fn in_memory(index_order: u32) -> Result<Self> {
        check_order(index_order)?;
        Ok(Self {
            backing: Backing::Memory,
            order: index_order,
            entries: BTreeMap::new(),
            index: BTreeMap::new(),
            bands: BTreeSet::new(),
        })
    }

    /// Open a file-backed store. A missing file is an empty cache; the file
    /// is created on the first insert.
    ///
    /// # Errors
    /// [`Error::StoreCorruption`] if the file exists but is not a valid cache.
    pub fn open(path: impl Into<PathBuf>, index_order: u32) -> Result<Self> {
        check_order(index_order)?;
        let path = path.into();
        let mut store = Self {
            backing: Backing::File(path.clone()),
            order: index_order,
            entries: BTreeMap::new(),
            index: BTreeMap::new(),
            bands: BTreeSet::new(),
        };
        if let Some((bands, entries)) = load(&path)? {
            store.bands.extend(bands);
            for entry in entries {
                store.publish(entry);
            }
            log::info!("loaded {} cached entries from {:?}", store.len(), path);
        }
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Memory => None,
            Backing::File(path) => Some(path),
        }
    }

    pub fn index_order(&self) -> u32 {
        self.order
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &CatalogId) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    /// Every band seen in any inserted entry, sorted.
    pub fn bands(&self) -> impl Iterator<Item = &str> {
        self.bands.iter().map(String::as_str)
    }

    pub fn has_band(&self, band: &str) -> bool {
        self.bands.contains(band)
    }

    /// Entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    /// Merge new entries, ignoring ids already cached (or repeated within the
    /// batch, first occurrence wins). Returns the number newly inserted.
    ///
    /// The whole batch is rejected with [`Error::InvalidEntry`] if any entry
    /// has a non-finite position or a declination outside `[-90, 90]`. On any
    /// error neither the file nor the in-memory table changes.
    pub fn insert_many(&mut self, entries: impl IntoIterator<Item = CatalogEntry>) -> Result<usize> {
        let batch = entries
            .into_iter()
            .map(CatalogEntry::validated)
            .collect::<Result<Vec<_>>>()?;

        let Some(path) = self.path().map(Path::to_path_buf) else {
            let mut inserted = 0;
            for entry in batch {
                if !self.entries.contains_key(&entry.id) {
                    self.publish(entry);
                    inserted += 1;
                }
            }
            return Ok(inserted);
        };

        let _lock = WriteLock::acquire(&path)?;

        let disk_only = self.unseen_on_disk(&path)?;
        let mut seen: BTreeSet<&CatalogId> = self.entries.keys().collect();
        seen.extend(disk_only.iter().map(|e| &e.id));

        let mut fresh = Vec::new();
        for entry in &batch {
            if seen.insert(&entry.id) {
                fresh.push(entry);
            }
        }

        if !fresh.is_empty() {
            let mut bands = self.bands.clone();
            for entry in disk_only.iter().chain(fresh.iter().copied()) {
                bands.extend(entry.photometry.keys().cloned());
            }
            let bands: Vec<String> = bands.into_iter().collect();

            let mut table: BTreeMap<&CatalogId, &CatalogEntry> = self.entries.iter().collect();
            for entry in disk_only.iter().chain(fresh.iter().copied()) {
                table.insert(&entry.id, entry);
            }
            commit(&path, &bands, table.into_values())?;
        }

        let inserted = fresh.len();
        let mut fresh_ids: BTreeSet<CatalogId> = fresh.into_iter().map(|e| e.id.clone()).collect();
        let merged = disk_only.len();
        for entry in disk_only {
            self.publish(entry);
        }
        for entry in batch {
            if fresh_ids.remove(&entry.id) {
                self.publish(entry);
            }
        }

        if inserted > 0 {
            log::info!(
                "committed {} new entries to {:?} ({} total, {} merged from disk)",
                inserted,
                path,
                self.len(),
                merged
            );
        }
        Ok(inserted)
    }

    /// Pick up entries committed to the file by other handles. Returns the
    /// number of entries merged. No-op for in-memory stores.
    pub fn refresh(&mut self) -> Result<usize> {
        let Some(path) = self.path().map(Path::to_path_buf) else {
            return Ok(0);
        };
        let disk_only = self.unseen_on_disk(&path)?;
        let merged = disk_only.len();
        for entry in disk_only {
            self.publish(entry);
        }
        if merged > 0 {
            log::debug!("refreshed {} entries from {:?}", merged, path);
        }
        Ok(merged)
    }

    /// All cached entries inside `region`, ordered by id.
    pub fn query_region(&self, region: &Region) -> Vec<CatalogEntry> {
        self.entries_within(region).into_iter().cloned().collect()
    }

    pub fn count_region(&self, region: &Region) -> usize {
        self.candidates(region)
            .filter(|entry| region.contains(&entry.position()))
            .count()
    }

    /// Borrowing form of [`EntryStore::query_region`].
    pub fn entries_within(&self, region: &Region) -> Vec<&CatalogEntry> {
        let mut found: Vec<&CatalogEntry> = self
            .candidates(region)
            .filter(|entry| region.contains(&entry.position()))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Entries in the buckets that may intersect `region`.
    fn candidates<'a>(&'a self, region: &Region) -> Box<dyn Iterator<Item = &'a CatalogEntry> + 'a> {
        let cap = region.bounding_cap();
        let estimate = healpix::estimated_disc_pixels(self.order, cap.radius_deg);

        if estimate > self.index.len() as f64 {
            log::debug!(
                "scanning {} occupied pixels (coverage estimate {:.0})",
                self.index.len(),
                estimate
            );
            return Box::new(
                self.index
                    .values()
                    .flatten()
                    .filter_map(move |id| self.entries.get(id)),
            );
        }

        let pixels = healpix::disc_pixels(self.order, cap.center.ra, cap.center.dec, cap.radius_deg);
        log::debug!("region query touches {} candidate pixels", pixels.len());
        Box::new(
            pixels
                .into_iter()
                .filter_map(move |pixel| self.index.get(&pixel))
                .flatten()
                .filter_map(move |id| self.entries.get(id)),
        )
    }

    /// Entries in the file that this handle has not seen yet.
    fn unseen_on_disk(&self, path: &Path) -> Result<Vec<CatalogEntry>> {
        let Some((_, entries)) = load(path)? else {
            return Ok(Vec::new());
        };
        Ok(entries
            .into_iter()
            .filter(|e| !self.entries.contains_key(&e.id))
            .collect())
    }

    fn publish(&mut self, entry: CatalogEntry) {
        let pixel = healpix::ang2pix_nest(self.order, entry.ra, entry.dec);
        self.bands.extend(entry.photometry.keys().cloned());
        self.index.entry(pixel).or_default().push(entry.id.clone());
        self.entries.insert(entry.id.clone(), entry);
    }
}

fn check_order(order: u32) -> Result<()> {
    if order > MAX_ORDER {
        return Err(Error::Config(format!(
            "index order {order} exceeds the maximum of {MAX_ORDER}"
        )));
    }
    Ok(())
}

fn load(path: &Path) -> Result<Option<(Vec<String>, Vec<CatalogEntry>)>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    format::read_table(&mut reader, path).map(Some)
}

/// Write `entries` to a temporary sibling, sync it, then rename it over
/// `path`. The temporary file is removed if any step fails.
fn commit<'a>(
    path: &Path,
    bands: &[String],
    entries: impl ExactSizeIterator<Item = &'a CatalogEntry>,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = sibling(path, ".tmp");
    let written = (|| -> std::io::Result<()> {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        format::write_table(&mut writer, bands, entries)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sky::SkyPosition;

    fn star(id: i64, ra: f64, dec: f64, g: f64) -> CatalogEntry {
        CatalogEntry::new(id, ra, dec).with_band("g", g, 0.01)
    }

    /// Deterministic pseudo-random field, spread over `size` degrees.
    fn field(n: usize, ra0: f64, dec0: f64, size: f64) -> Vec<CatalogEntry> {
        (0..n)
            .map(|i| {
                let u = ((i as f64 * 0.618_033_988_7) % 1.0) * size;
                let v = ((i as f64 * 0.754_877_666_2) % 1.0) * size;
                star(i as i64, ra0 + u, dec0 + v, 14.0 + (i % 7) as f64 * 0.3)
            })
            .collect()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut store = EntryStore::in_memory(8).unwrap();
        let batch = field(50, 10.0, 10.0, 0.5);
        assert_eq!(store.insert_many(batch.clone()).unwrap(), 50);
        assert_eq!(store.insert_many(batch).unwrap(), 0);
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn test_duplicate_within_batch_first_wins() {
        let mut store = EntryStore::in_memory(8).unwrap();
        let inserted = store
            .insert_many(vec![star(1, 10.0, 10.0, 15.0), star(1, 20.0, 20.0, 16.0)])
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.get(&CatalogId::Int(1)).unwrap().ra, 10.0);
    }

    #[test]
    fn test_reinsert_never_overwrites() {
        let mut store = EntryStore::in_memory(8).unwrap();
        store.insert_many(vec![star(1, 10.0, 10.0, 15.0)]).unwrap();
        store.insert_many(vec![star(1, 10.0, 10.0, 99.0)]).unwrap();
        assert_eq!(store.get(&CatalogId::Int(1)).unwrap().magnitude("g"), Some(15.0));
    }

    #[test]
    fn test_invalid_entry_rejects_whole_batch() {
        let mut store = EntryStore::in_memory(8).unwrap();
        let err = store
            .insert_many(vec![star(1, 10.0, 10.0, 15.0), star(2, 10.0, 95.0, 15.0)])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEntry { id: CatalogId::Int(2), .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_ra_normalized_on_insert() {
        let mut store = EntryStore::in_memory(8).unwrap();
        store.insert_many(vec![star(1, -1.0, 0.0, 15.0)]).unwrap();
        assert_eq!(store.get(&CatalogId::Int(1)).unwrap().ra, 359.0);
    }

    #[test]
    fn test_region_query_matches_brute_force() {
        let mut store = EntryStore::in_memory(8).unwrap();
        store.insert_many(field(2000, 149.0, 1.0, 2.0)).unwrap();

        let regions = vec![
            Region::cap(SkyPosition::new(150.0, 2.0), 0.4).unwrap(),
            Region::cap(SkyPosition::new(149.1, 1.1), 0.05).unwrap(),
            Region::cap(SkyPosition::new(150.0, 2.0), 5.0).unwrap(),
            Region::polygon(&[
                SkyPosition::new(149.5, 1.5),
                SkyPosition::new(150.5, 1.6),
                SkyPosition::new(150.3, 2.6),
                SkyPosition::new(149.4, 2.3),
            ])
            .unwrap(),
        ];

        for region in &regions {
            let expected: Vec<CatalogId> = store
                .iter()
                .filter(|e| region.contains(&e.position()))
                .map(|e| e.id.clone())
                .collect();
            let got: Vec<CatalogId> = store.query_region(region).into_iter().map(|e| e.id).collect();
            assert_eq!(got, expected, "{region:?}");
            assert_eq!(store.count_region(region), expected.len());
        }
    }

    #[test]
    fn test_region_query_across_ra_wrap() {
        let mut store = EntryStore::in_memory(8).unwrap();
        store
            .insert_many(vec![
                star(1, 359.99, 0.0, 15.0),
                star(2, 0.01, 0.0, 15.0),
                star(3, 1.0, 0.0, 15.0),
            ])
            .unwrap();
        let region = Region::cap(SkyPosition::new(0.0, 0.0), 0.05).unwrap();
        let ids: Vec<_> = store.query_region(&region).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![CatalogId::Int(1), CatalogId::Int(2)]);
    }

    #[test]
    fn test_region_query_near_pole() {
        let mut store = EntryStore::in_memory(8).unwrap();
        store
            .insert_many((0..36).map(|i| star(i, i as f64 * 10.0, 89.8, 15.0)))
            .unwrap();
        let region = Region::cap(SkyPosition::new(0.0, 90.0), 0.25).unwrap();
        assert_eq!(store.count_region(&region), 36);
    }

    #[test]
    fn test_empty_store_queries() {
        let store = EntryStore::in_memory(8).unwrap();
        let region = Region::cap(SkyPosition::new(0.0, 0.0), 1.0).unwrap();
        assert!(store.query_region(&region).is_empty());
        assert_eq!(store.count_region(&region), 0);
    }

    #[test]
    fn test_order_limit() {
        assert!(matches!(EntryStore::in_memory(MAX_ORDER + 1), Err(Error::Config(_))));
    }

    #[test]
    fn test_file_store_in_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("deeper").join("cache.pcat");

        let mut store = EntryStore::open(&path, 8).unwrap();
        assert!(store.is_empty());
        store
            .insert_many(vec![CatalogEntry::new(7, 10.0, -5.0).with_band("g", 15.0, 0.01)])
            .unwrap();

        assert!(path.exists());
        let reopened = EntryStore::open(&path, 8).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.get(&CatalogId::Int(7)).is_some());
    }

    #[test]
    fn test_oversized_id_never_reaches_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.pcat");
        let mut store = EntryStore::open(&path, 8).unwrap();
        store.insert_many(field(3, 1.0, 1.0, 0.2)).unwrap();

        let long = CatalogEntry::new("J".repeat(70_000), 1.0, 1.0).with_band("g", 15.0, 0.01);
        let err = store.insert_many(vec![long]).unwrap_err();
        assert!(matches!(err, Error::InvalidEntry { .. }));

        assert_eq!(EntryStore::open(&path, 8).unwrap().len(), 3);
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.pcat");

        {
            let mut store = EntryStore::open(&path, 8).unwrap();
            assert!(store.is_empty());
            assert!(!path.exists());
            store.insert_many(field(30, 1.0, 1.0, 0.2)).unwrap();
            store
                .insert_many(vec![CatalogEntry::new("SMSS-1", 1.1, 1.1).with_band("r", 16.0, 0.02)])
                .unwrap();
        }

        let store = EntryStore::open(&path, 8).unwrap();
        assert_eq!(store.len(), 31);
        assert_eq!(store.bands().collect::<Vec<_>>(), vec!["g", "r"]);
        let text = store.get(&CatalogId::from("SMSS-1")).unwrap();
        assert_eq!(text.magnitude("r"), Some(16.0));
        assert_eq!(text.magnitude("g"), None);
        assert!(!sibling(&path, ".tmp").exists());
    }

    #[test]
    fn test_two_handles_merge_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.pcat");

        let mut a = EntryStore::open(&path, 8).unwrap();
        let mut b = EntryStore::open(&path, 8).unwrap();

        a.insert_many(vec![star(1, 1.0, 1.0, 15.0)]).unwrap();
        assert_eq!(b.insert_many(vec![star(1, 1.0, 1.0, 15.0), star(2, 1.1, 1.1, 15.0)]).unwrap(), 1);
        assert_eq!(b.len(), 2);

        assert_eq!(a.refresh().unwrap(), 1);
        assert_eq!(a.len(), 2);

        let fresh = EntryStore::open(&path, 8).unwrap();
        assert_eq!(fresh.len(), 2);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pcat");
        fs::write(&path, b"not a cache").unwrap();
        assert!(matches!(EntryStore::open(&path, 8), Err(Error::StoreCorruption { .. })));
    }

    #[test]
    fn test_failed_commit_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.pcat");
        let mut store = EntryStore::open(&path, 8).unwrap();
        store.insert_many(vec![star(1, 1.0, 1.0, 15.0)]).unwrap();
        let before = fs::read(&path).unwrap();

        // A directory where the temporary file should go makes the write fail.
        fs::create_dir(sibling(&path, ".tmp")).unwrap();
        assert!(store.insert_many(vec![star(2, 1.1, 1.1, 15.0)]).is_err());

        assert_eq!(store.len(), 1);
        assert_eq!(fs::read(&path).unwrap(), before);
    }
}
