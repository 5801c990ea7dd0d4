use inkboard_shared::Point;

pub const DEFAULT_COLOR: &str = "#1f1f1f";
pub const ERASER_COLOR: &str = "#ffffff";
pub const DEFAULT_SIZE: f32 = 6.0;
pub const MIN_SIZE: f32 = 1.0;
pub const MAX_SIZE: f32 = 60.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    Pen,
    /// Paints with the board background color.
    Eraser,
}

/// Local, unshared tool state. Only used to build the next segment.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawState {
    pub tool: Tool,
    pub color: String,
    pub size: f32,
    /// Previous point of the drag in progress, if any.
    pub last_point: Option<Point>,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            tool: Tool::Pen,
            color: DEFAULT_COLOR.to_string(),
            size: DEFAULT_SIZE,
            last_point: None,
        }
    }
}

impl DrawState {
    pub fn set_color(&mut self, color: &str) {
        self.color = sanitize_color(color.to_string());
    }

    pub fn set_size(&mut self, size: f32) {
        self.size = sanitize_size(size);
    }

    /// Color of the next segment for the active tool.
    pub fn stroke_color(&self) -> &str {
        match self.tool {
            Tool::Pen => &self.color,
            Tool::Eraser => ERASER_COLOR,
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.last_point.is_some()
    }
}

pub fn sanitize_color(mut color: String) -> String {
    color = color.trim().to_string();
    if color.is_empty() {
        return DEFAULT_COLOR.to_string();
    }
    if color.len() > 32 {
        let mut end = 32;
        while !color.is_char_boundary(end) {
            end -= 1;
        }
        color.truncate(end);
    }
    color
}

pub fn sanitize_size(size: f32) -> f32 {
    let size = if size.is_finite() { size } else { DEFAULT_SIZE };
    size.clamp(MIN_SIZE, MAX_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_clamped() {
        assert_eq!(sanitize_size(f32::NAN), DEFAULT_SIZE);
        assert_eq!(sanitize_size(0.2), MIN_SIZE);
        assert_eq!(sanitize_size(500.0), MAX_SIZE);
        assert_eq!(sanitize_size(5.0), 5.0);
    }

    #[test]
    fn eraser_ignores_the_pen_color() {
        let mut state = DrawState::default();
        state.set_color("#ff0000");
        assert_eq!(state.stroke_color(), "#ff0000");
        state.tool = Tool::Eraser;
        assert_eq!(state.stroke_color(), ERASER_COLOR);
        state.set_color("  ");
        assert_eq!(state.color, DEFAULT_COLOR);
    }
}
