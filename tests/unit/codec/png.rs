use super::*;

fn decode(bytes: &[u8]) -> image::DynamicImage {
    image::load_from_memory_with_format(bytes, ImageFormat::Png).unwrap()
}

#[test]
fn color_png_keeps_dimensions_and_clamps() {
    let buf = RasterBuffer::new(
        2,
        1,
        4,
        vec![1.0, 0.0, 0.5, 1.0, 2.0, -1.0, 0.25, 0.0],
    )
    .unwrap();
    let img = decode(&encode_color_png(&buf).unwrap()).to_rgba8();
    assert_eq!(img.dimensions(), (2, 1));
    assert_eq!(img.get_pixel(0, 0).0, [255, 0, 128, 255]);
    assert_eq!(img.get_pixel(1, 0).0, [255, 0, 64, 0]);
}

#[test]
fn three_channel_color_is_opaque() {
    let buf = RasterBuffer::new(1, 1, 3, vec![0.0, 1.0, 0.0]).unwrap();
    let img = decode(&encode_color_png(&buf).unwrap()).to_rgba8();
    assert_eq!(img.get_pixel(0, 0).0, [0, 255, 0, 255]);
}

#[test]
fn color_rejects_wrong_channel_count() {
    let buf = RasterBuffer::new(1, 1, 1, vec![0.0]).unwrap();
    assert!(encode_color_png(&buf).is_err());
}

#[test]
fn depth_png_is_16_bit_linear() {
    let buf = RasterBuffer::new(3, 1, 1, vec![0.0, 25.0, f32::INFINITY]).unwrap();
    let img = decode(&encode_depth_png(&buf, 50.0).unwrap());
    assert_eq!(img.color(), image::ColorType::L16);
    let img = img.to_luma16();
    assert_eq!(img.get_pixel(0, 0).0[0], 0);
    assert_eq!(img.get_pixel(1, 0).0[0], 32768);
    assert_eq!(img.get_pixel(2, 0).0[0], u16::MAX);

    let back = decode_depth_value(img.get_pixel(1, 0).0[0], 50.0);
    assert!((back - 25.0).abs() < 50.0 / 65535.0);
}

#[test]
fn depth_beyond_range_saturates() {
    assert_eq!(quantize_depth(80.0, 50.0), u16::MAX);
    assert_eq!(quantize_depth(-1.0, 50.0), 0);
    assert_eq!(quantize_depth(f32::NAN, 50.0), u16::MAX);
}

#[test]
fn normal_png_maps_signed_components() {
    let buf = RasterBuffer::new(1, 1, 3, vec![0.0, 0.0, 1.0]).unwrap();
    let img = decode(&encode_normal_png(&buf, None).unwrap()).to_rgb8();
    assert_eq!(img.get_pixel(0, 0).0, [128, 128, 255]);
}

#[test]
fn normal_png_rotates_into_camera_space() {
    // Camera rotated +90deg about Z: world +Y lies along the camera +X axis.
    let r = Matrix3::from_angle_z(cgmath::Rad(std::f64::consts::FRAC_PI_2));
    let buf = RasterBuffer::new(1, 1, 3, vec![0.0, 1.0, 0.0]).unwrap();
    let img = decode(&encode_normal_png(&buf, Some(r)).unwrap()).to_rgb8();
    // R^T * (0, 1, 0) = (1, 0, 0)
    assert_eq!(img.get_pixel(0, 0).0, [255, 128, 128]);
}
