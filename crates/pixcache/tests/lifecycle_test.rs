//! Reference counting, copy-on-write and cloning between stores.

use std::sync::Arc;

use pixcache::{
    CacheConfig, CacheContext, CacheType, ClassType, Image, PixelPacket, Region, ResourceType,
};
use tempfile::TempDir;

fn context(dir: &TempDir) -> Arc<CacheContext> {
    CacheContext::init(CacheConfig {
        temporary_path: Some(dir.path().to_path_buf()),
        thread_limit: 4,
        ..CacheConfig::default()
    })
}

fn fill(image: &mut Image, seed: u16) {
    let columns = image.columns();
    let rows = image.rows();
    let mut window = image.queue_authentic_pixels(0, 0, columns, rows).unwrap();
    for (i, px) in window.pixels_mut().iter_mut().enumerate() {
        *px = PixelPacket::opaque(seed, (i % columns) as u16, (i / columns) as u16);
    }
    if let Some(indexes) = window.indexes_mut() {
        for (i, index) in indexes.iter_mut().enumerate() {
            *index = seed.wrapping_add(i as u16);
        }
    }
    window.sync().unwrap();
}

fn snapshot(image: &Image) -> (Vec<PixelPacket>, Option<Vec<u16>>) {
    let window = image
        .get_virtual_pixels(0, 0, image.columns(), image.rows())
        .unwrap();
    (window.pixels().to_vec(), window.indexes().map(<[u16]>::to_vec))
}

#[test]
fn test_storage_released_after_last_reference() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let mut image = Image::new(&ctx, 8, 8).unwrap();
    fill(&mut image, 3);
    let length = image.cache().length();
    let usage = || ctx.resources().usage(ResourceType::Memory);
    assert_eq!(usage(), length);

    let mut held: Vec<_> = (0..4).map(|_| image.reference_pixel_cache()).collect();
    assert_eq!(image.cache().reference_count(), 5);

    for cache in held.drain(1..) {
        cache.destroy();
        assert_eq!(usage(), length);
    }
    image.destroy_pixel_cache();
    assert_eq!(usage(), length);

    // the last holder still reads valid pixels
    let last = held.pop().unwrap();
    assert_eq!(last.reference_count(), 1);
    assert_eq!(last.pixels().unwrap()[9], PixelPacket::opaque(3, 1, 1));
    last.destroy();
    assert_eq!(usage(), 0);
}

#[test]
fn test_shared_cache_copied_on_write() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let mut first = Image::new(&ctx, 5, 5).unwrap();
    fill(&mut first, 1);
    let mut second = first.clone();
    assert!(first.cache().ptr_eq(second.cache()));
    assert_eq!(first.cache().reference_count(), 2);

    let mut window = second.get_authentic_pixels(0, 2, 5, 1).unwrap();
    window.pixels_mut()[0] = PixelPacket::WHITE;
    window.sync().unwrap();

    assert!(!first.cache().ptr_eq(second.cache()));
    assert_eq!(first.cache().reference_count(), 1);
    assert_eq!(first.get_one_virtual_pixel(0, 2).unwrap(), PixelPacket::opaque(1, 0, 2));
    assert_eq!(second.get_one_virtual_pixel(0, 2).unwrap(), PixelPacket::WHITE);
    // untouched pixels were carried over
    assert_eq!(second.get_one_virtual_pixel(4, 4).unwrap(), PixelPacket::opaque(1, 4, 4));
}

#[test]
fn test_held_reference_keeps_original_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let mut image = Image::new(&ctx, 3, 3).unwrap();
    fill(&mut image, 7);
    let held = image.reference_pixel_cache();
    assert_eq!(held.reference_count(), 2);

    let id = image.get_image_pixel_cache(true).unwrap().id();
    assert_ne!(id, held.id());
    let mut window = image.queue_authentic_pixels(1, 1, 1, 1).unwrap();
    window.pixels_mut()[0] = PixelPacket::BLACK;
    window.sync().unwrap();

    assert_eq!(held.reference_count(), 1);
    assert_eq!(held.pixels().unwrap()[4], PixelPacket::opaque(7, 1, 1));
    assert_eq!(image.get_pixel_cache_pixels().unwrap()[4], PixelPacket::BLACK);
}

#[test]
fn test_reads_do_not_copy() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let image = Image::new(&ctx, 3, 3).unwrap();
    let other = image.clone();
    let _ = other.get_virtual_pixels(0, 0, 3, 3).unwrap();
    assert!(image.cache().ptr_eq(other.cache()));
}

#[test]
fn test_clone_between_stores() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let pairs = [
        (CacheType::Memory, CacheType::Memory),
        (CacheType::Disk, CacheType::Disk),
        (CacheType::Memory, CacheType::Disk),
        (CacheType::Disk, CacheType::Memory),
        (CacheType::Map, CacheType::Disk),
    ];
    for (from, to) in pairs {
        for storage_class in [ClassType::Direct, ClassType::Pseudo] {
            let mut source = Image::new(&ctx, 13, 70).unwrap();
            source.set_storage_class(storage_class).unwrap();
            source.set_cache_type(Some(from)).unwrap();
            fill(&mut source, 11);
            let expected = snapshot(&source);

            let mut copy = source.clone();
            if from == to {
                copy.get_image_pixel_cache(true).unwrap();
            } else {
                copy.set_cache_type(Some(to)).unwrap();
            }
            assert!(!copy.cache().ptr_eq(source.cache()));
            assert_eq!(copy.get_pixel_cache_type(), to);
            assert_eq!(snapshot(&copy), expected, "{from} -> {to} {storage_class:?}");
            assert_eq!(snapshot(&source), expected);
        }
    }
}

#[test]
fn test_resize_preserves_overlap_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let mut image = Image::new(&ctx, 6, 6).unwrap();
    image.set_cache_type(Some(CacheType::Disk)).unwrap();
    fill(&mut image, 2);
    image.set_extent(4, 8).unwrap();
    assert_eq!(image.get_pixel_cache_type(), CacheType::Disk);
    let pixels = image.cache().read_region(Region::new(0, 0, 4, 8)).unwrap();
    assert_eq!(pixels[4 * 5 + 3], PixelPacket::opaque(2, 3, 5));
    assert_eq!(pixels[4 * 7], PixelPacket::default());
}

#[test]
fn test_ping_toggle() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let mut image = Image::ping(&ctx, 4, 4).unwrap();
    assert!(image.get_pixel_cache_pixels().is_none());
    assert!(image.get_authentic_pixels(0, 0, 1, 1).is_err());
    image.set_ping(false).unwrap();
    assert_eq!(image.get_pixel_cache_type(), CacheType::Memory);
    assert_eq!(image.get_one_authentic_pixel(3, 3).unwrap(), PixelPacket::default());
}
