use inkboard_shared::Point;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Down,
    Move,
    Up,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Mouse,
    Touch { touches: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    pub phase: Phase,
    pub source: Source,
    pub x: f32,
    pub y: f32,
}

impl PointerEvent {
    pub fn mouse(phase: Phase, x: f32, y: f32) -> Self {
        Self {
            phase,
            source: Source::Mouse,
            x,
            y,
        }
    }

    pub fn touch(phase: Phase, touches: u32, x: f32, y: f32) -> Self {
        Self {
            phase,
            source: Source::Touch { touches },
            x,
            y,
        }
    }

    /// Point the event maps to, or `None` for multi-touch and non-finite
    /// coordinates. Single touches behave exactly like the mouse.
    pub fn point(&self) -> Option<Point> {
        if let Source::Touch { touches } = self.source {
            if touches > 1 {
                return None;
            }
        }
        let point = Point::new(self.x, self.y);
        point.is_finite().then_some(point)
    }
}

/// Converts viewport coordinates to surface pixels given the surface's
/// on-screen rectangle.
pub fn viewport_to_surface(
    client_x: f64,
    client_y: f64,
    rect: (f64, f64, f64, f64),
    surface_size: (u32, u32),
) -> Option<(f32, f32)> {
    let (left, top, width, height) = rect;
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    let x = (client_x - left) * surface_size.0 as f64 / width;
    let y = (client_y - top) * surface_size.1 as f64 / height;
    Some((x as f32, y as f32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_touch_matches_mouse() {
        let mouse = PointerEvent::mouse(Phase::Move, 3.0, 4.0);
        let touch = PointerEvent::touch(Phase::Move, 1, 3.0, 4.0);
        assert_eq!(mouse.point(), touch.point());
        assert_eq!(PointerEvent::touch(Phase::Move, 2, 3.0, 4.0).point(), None);
    }

    #[test]
    fn viewport_coordinates_scale_to_surface() {
        assert_eq!(
            viewport_to_surface(60.0, 30.0, (10.0, 10.0, 100.0, 50.0), (200, 100)),
            Some((100.0, 40.0))
        );
        assert_eq!(viewport_to_surface(0.0, 0.0, (0.0, 0.0, 0.0, 10.0), (1, 1)), None);
    }
}
