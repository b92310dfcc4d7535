//! Persisting caches to named files and attaching them again.

use std::sync::Arc;

use pixcache::{CacheConfig, CacheContext, CacheType, Image, MapMode, PixelPacket, PERSIST_ALIGNMENT};
use tempfile::TempDir;

fn context(dir: &TempDir) -> Arc<CacheContext> {
    CacheContext::init(CacheConfig {
        temporary_path: Some(dir.path().to_path_buf()),
        ..CacheConfig::default()
    })
}

const CELLS: [PixelPacket; 4] = [
    PixelPacket::opaque(10, 0, 0),
    PixelPacket::opaque(0, 20, 0),
    PixelPacket::opaque(0, 0, 30),
    PixelPacket::new(40, 40, 40, 4),
];

#[test]
fn test_disk_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let path = dir.path().join("image.cache");

    let mut image = Image::new(&ctx, 2, 2).unwrap();
    image.set_cache_type(Some(CacheType::Disk)).unwrap();
    for (i, value) in CELLS.iter().enumerate() {
        let mut cell = image
            .queue_authentic_pixels((i % 2) as i64, (i / 2) as i64, 1, 1)
            .unwrap();
        cell.pixels_mut()[0] = *value;
        cell.sync().unwrap();
    }
    let mut offset = 0;
    image.persist_pixel_cache(&path, false, &mut offset).unwrap();
    assert_eq!(offset, PERSIST_ALIGNMENT);
    assert_eq!(image.cache().path(), Some(path.as_path()));
    assert_eq!(image.cache().mode(), MapMode::Persist);
    drop(image);
    assert!(path.exists());

    let mut reopened = Image::new(&ctx, 2, 2).unwrap();
    reopened.set_cache_type(Some(CacheType::Disk)).unwrap();
    let mut offset = 0;
    reopened.persist_pixel_cache(&path, true, &mut offset).unwrap();
    assert_eq!(offset, PERSIST_ALIGNMENT);
    assert_eq!(reopened.cache().mode(), MapMode::Read);
    let window = reopened.get_virtual_pixels(0, 0, 2, 2).unwrap();
    assert_eq!(window.pixels(), &CELLS);
}

#[test]
fn test_attached_cache_is_copied_before_writes() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let path = dir.path().join("shared.cache");

    let mut image = Image::new(&ctx, 2, 2).unwrap();
    let mut window = image.queue_authentic_pixels(0, 0, 2, 2).unwrap();
    window.pixels_mut().copy_from_slice(&CELLS);
    window.sync().unwrap();
    image.persist_pixel_cache(&path, false, &mut 0).unwrap();
    drop(image);

    let mut attached = Image::new(&ctx, 2, 2).unwrap();
    attached.persist_pixel_cache(&path, true, &mut 0).unwrap();
    let mut window = attached.get_authentic_pixels(0, 0, 1, 1).unwrap();
    window.pixels_mut()[0] = PixelPacket::WHITE;
    window.sync().unwrap();
    assert_ne!(attached.cache().path(), Some(path.as_path()));

    // the file still holds the persisted pixels
    let mut again = Image::new(&ctx, 2, 2).unwrap();
    again.persist_pixel_cache(&path, true, &mut 0).unwrap();
    assert_eq!(again.get_one_virtual_pixel(0, 0).unwrap(), CELLS[0]);
}

#[test]
fn test_chained_images_in_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let path = dir.path().join("chain.cache");
    let extents = [(3usize, 3usize), (40, 20), (1, 1)];

    let mut offset = 0;
    let mut offsets = Vec::new();
    for (n, &(columns, rows)) in extents.iter().enumerate() {
        let mut image = Image::new(&ctx, columns, rows).unwrap();
        let mut window = image.queue_authentic_pixels(0, 0, columns, rows).unwrap();
        window.pixels_mut().fill(PixelPacket::gray(n as u16 + 1));
        window.sync().unwrap();
        offsets.push(offset);
        image.persist_pixel_cache(&path, false, &mut offset).unwrap();
    }
    assert_eq!(offsets, [0, 4096, 12288]);
    assert_eq!(offset, 16384);

    let mut offset = 0;
    for (n, &(columns, rows)) in extents.iter().enumerate() {
        let mut image = Image::new(&ctx, columns, rows).unwrap();
        image.persist_pixel_cache(&path, true, &mut offset).unwrap();
        let px = image
            .get_one_virtual_pixel(columns as i64 - 1, rows as i64 - 1)
            .unwrap();
        assert_eq!(px, PixelPacket::gray(n as u16 + 1));
    }
}

#[test]
fn test_attach_short_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let path = dir.path().join("short.cache");
    std::fs::write(&path, [0u8; 16]).unwrap();

    let mut image = Image::new(&ctx, 4, 4).unwrap();
    let err = image.persist_pixel_cache(&path, true, &mut 0).unwrap_err();
    assert_eq!(err.domain(), "cache");
    assert_eq!(image.exception().len(), 1);
    // the previous cache is still in place
    assert_eq!(image.get_pixel_cache_type(), CacheType::Memory);
}
