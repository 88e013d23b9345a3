//! Generated product images for pipeline tests

use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;

/// A product shot: opaque subject on a transparent canvas
pub fn cutout_png(width: u32, height: u32) -> Vec<u8> {
    let mut image = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    for x in width / 4..width / 2 {
        for y in height / 3..height * 2 / 3 {
            image.put_pixel(x, y, Rgba([200, (x % 256) as u8, (y % 256) as u8, 255]));
        }
    }
    encode(&image, ImageFormat::Png)
}

/// A studio photo without alpha: bright subject on a black backdrop
pub fn studio_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut image = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    for x in width / 3..width * 2 / 3 {
        for y in height / 3..height * 2 / 3 {
            image.put_pixel(x, y, Rgb([230, 230, 230]));
        }
    }
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .expect("encode jpeg fixture");
    buffer.into_inner()
}

/// A fully transparent image (no foreground at all)
pub fn empty_png(width: u32, height: u32) -> Vec<u8> {
    encode(&RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0])), ImageFormat::Png)
}

fn encode(image: &RgbaImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).expect("encode fixture");
    buffer.into_inner()
}
