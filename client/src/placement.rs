/// Rectangle an external image is merged into, in surface pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Half the surface width, source aspect ratio kept, centered on the surface.
/// A degenerate source is treated as square.
pub fn place_image(
    source_width: u32,
    source_height: u32,
    surface_width: u32,
    surface_height: u32,
) -> Placement {
    let width = surface_width as f32 / 2.0;
    let aspect = if source_width == 0 || source_height == 0 {
        1.0
    } else {
        source_height as f32 / source_width as f32
    };
    let height = width * aspect;
    Placement {
        x: (surface_width as f32 - width) / 2.0,
        y: (surface_height as f32 - height) / 2.0,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_source_on_square_surface() {
        assert_eq!(
            place_image(400, 200, 1000, 1000),
            Placement {
                x: 250.0,
                y: 375.0,
                width: 500.0,
                height: 250.0,
            }
        );
    }

    #[test]
    fn tall_source_may_overflow_vertically() {
        let placement = place_image(100, 400, 200, 100);
        assert_eq!(placement.width, 100.0);
        assert_eq!(placement.height, 400.0);
        assert_eq!(placement.x, 50.0);
        assert_eq!(placement.y, -150.0);
    }

    #[test]
    fn empty_source_is_square() {
        let placement = place_image(0, 0, 800, 600);
        assert_eq!(placement.width, 400.0);
        assert_eq!(placement.height, 400.0);
    }
}
