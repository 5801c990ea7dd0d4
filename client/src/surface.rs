use image::RgbaImage;
use inkboard_shared::Point;

/// Pixel target the replayer draws on. Resizing discards the contents.
pub trait Surface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn resize(&mut self, width: u32, height: u32);
    fn clear(&mut self);
    fn stroke_line(&mut self, from: Point, to: Point, color: &str, width: f32);
    fn draw_image(&mut self, image: &RgbaImage, x: f32, y: f32, width: f32, height: f32);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const BLACK: Rgba = Rgba([0, 0, 0, 255]);
    pub const TRANSPARENT: Rgba = Rgba([0, 0, 0, 0]);
}

fn hex_digit(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|value| value as u8)
}

fn hex_pair(pair: &[u8]) -> Option<u8> {
    Some(hex_digit(pair[0])? * 16 + hex_digit(pair[1])?)
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    let bytes = hex.as_bytes();
    match bytes.len() {
        3 | 4 => {
            let mut out = [255u8; 4];
            for (i, c) in bytes.iter().enumerate() {
                out[i] = hex_digit(*c)? * 17;
            }
            Some(Rgba(out))
        }
        6 | 8 => {
            let mut out = [255u8; 4];
            for (i, pair) in bytes.chunks(2).enumerate() {
                out[i] = hex_pair(pair)?;
            }
            Some(Rgba(out))
        }
        _ => None,
    }
}

fn parse_function(body: &str, with_alpha: bool) -> Option<Rgba> {
    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    let expected = if with_alpha { 4 } else { 3 };
    if parts.len() != expected {
        return None;
    }
    let mut out = [255u8; 4];
    for (i, part) in parts.iter().take(3).enumerate() {
        let value: f32 = part.parse().ok()?;
        out[i] = value.clamp(0.0, 255.0).round() as u8;
    }
    if with_alpha {
        let alpha: f32 = parts[3].parse().ok()?;
        out[3] = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
    }
    Some(Rgba(out))
}

/// Parses the CSS color forms the drawing tools produce.
pub fn parse_color(value: &str) -> Option<Rgba> {
    let value = value.trim().to_ascii_lowercase();
    if let Some(hex) = value.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(body) = value
        .strip_prefix("rgba(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return parse_function(body, true);
    }
    if let Some(body) = value
        .strip_prefix("rgb(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return parse_function(body, false);
    }
    let named = match value.as_str() {
        "black" => [0, 0, 0, 255],
        "white" => [255, 255, 255, 255],
        "red" => [255, 0, 0, 255],
        "green" => [0, 128, 0, 255],
        "blue" => [0, 0, 255, 255],
        "yellow" => [255, 255, 0, 255],
        "orange" => [255, 165, 0, 255],
        "purple" => [128, 0, 128, 255],
        "gray" | "grey" => [128, 128, 128, 255],
        "transparent" => [0, 0, 0, 0],
        _ => return None,
    };
    Some(Rgba(named))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_forms() {
        assert_eq!(parse_color("#ff0000"), Some(Rgba([255, 0, 0, 255])));
        assert_eq!(parse_color("#0F0"), Some(Rgba([0, 255, 0, 255])));
        assert_eq!(parse_color("#00000080"), Some(Rgba([0, 0, 0, 128])));
        assert_eq!(parse_color("#12345"), None);
        assert_eq!(parse_color("#gg0000"), None);
    }

    #[test]
    fn parses_functional_and_named_forms() {
        assert_eq!(parse_color("rgb(1, 2, 3)"), Some(Rgba([1, 2, 3, 255])));
        assert_eq!(parse_color("rgba(10,20,30,0.5)"), Some(Rgba([10, 20, 30, 128])));
        assert_eq!(parse_color(" White "), Some(Rgba([255, 255, 255, 255])));
        assert_eq!(parse_color("rgb(1,2)"), None);
        assert_eq!(parse_color("chartreuse-ish"), None);
    }
}
