//! Translates window-system pointer and touch events into [`InputEvent`]s for the hub.

use winit::event::{ElementState, TouchPhase};

use crate::{
    board::CANVAS,
    input::{InputEvent, MouseButton, Point, Target},
    math::Rect,
};

/// Cursor and touch bookkeeping between window events.
#[derive(Debug, Default)]
pub struct Pointer {
    cursor: Option<Point>,
    /// Touches that began on the canvas, in the order they went down.
    touches: Vec<(u64, Point)>,
}

impl Pointer {
    pub fn cursor_moved(&mut self, canvas: Rect, position: Point) -> (Target, InputEvent) {
        self.cursor = Some(position);
        (target_at(canvas, position), InputEvent::MouseMove { position })
    }

    pub fn cursor_left(&mut self) -> (Target, InputEvent) {
        self.cursor = None;
        (Target::Window, InputEvent::MouseLeave)
    }

    /// Returns `None` if the cursor position is unknown.
    pub fn button(
        &mut self,
        canvas: Rect,
        state: ElementState,
        button: MouseButton,
    ) -> Option<(Target, InputEvent)> {
        let position = self.cursor?;
        let event = match state {
            ElementState::Pressed => InputEvent::MouseDown { position, button },
            ElementState::Released => InputEvent::MouseUp { position },
        };
        Some((target_at(canvas, position), event))
    }

    /// Touches starting outside the canvas are ignored for their whole lifetime.
    pub fn touch(
        &mut self,
        canvas: Rect,
        id: u64,
        phase: TouchPhase,
        position: Point,
    ) -> Option<(Target, InputEvent)> {
        let index = self.touches.iter().position(|&(t, _)| t == id);
        match (phase, index) {
            (TouchPhase::Started, None) => {
                if !canvas.contains(position) {
                    return None;
                }
                self.touches.push((id, position));
            }
            (TouchPhase::Moved, Some(i)) => self.touches[i].1 = position,
            (TouchPhase::Ended | TouchPhase::Cancelled, Some(i)) => {
                self.touches.remove(i);
            }
            _ => return None,
        }

        let touches = self.touches.iter().map(|&(_, p)| p).collect();
        let event = match phase {
            TouchPhase::Started => InputEvent::TouchStart { touches },
            TouchPhase::Moved => InputEvent::TouchMove { touches },
            TouchPhase::Ended => InputEvent::TouchEnd { touches },
            TouchPhase::Cancelled => InputEvent::TouchCancel,
        };
        Some((Target::Surface(CANVAS), event))
    }
}

fn target_at(canvas: Rect, position: Point) -> Target {
    if canvas.contains(position) {
        Target::Surface(CANVAS)
    } else {
        Target::Window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::vec2;

    fn canvas() -> Rect {
        Rect::new(vec2(10.0, 10.0), vec2(100.0, 100.0))
    }

    #[test]
    fn release_goes_where_the_cursor_is() {
        let mut pointer = Pointer::default();
        assert!(pointer
            .button(canvas(), ElementState::Pressed, MouseButton::Primary)
            .is_none());

        let (target, _) = pointer.cursor_moved(canvas(), vec2(50.0, 50.0));
        assert_eq!(target, Target::Surface(CANVAS));
        assert_eq!(
            pointer.button(canvas(), ElementState::Pressed, MouseButton::Primary),
            Some((
                Target::Surface(CANVAS),
                InputEvent::MouseDown {
                    position: vec2(50.0, 50.0),
                    button: MouseButton::Primary,
                }
            ))
        );

        let (target, _) = pointer.cursor_moved(canvas(), vec2(200.0, 50.0));
        assert_eq!(target, Target::Window);
        assert_eq!(
            pointer.button(canvas(), ElementState::Released, MouseButton::Primary),
            Some((
                Target::Window,
                InputEvent::MouseUp {
                    position: vec2(200.0, 50.0),
                }
            ))
        );

        assert_eq!(pointer.cursor_left(), (Target::Window, InputEvent::MouseLeave));
        assert!(pointer
            .button(canvas(), ElementState::Released, MouseButton::Primary)
            .is_none());
    }

    #[test]
    fn touches_off_canvas_are_ignored() {
        let mut pointer = Pointer::default();
        let outside = vec2(5.0, 5.0);
        assert_eq!(pointer.touch(canvas(), 1, TouchPhase::Started, outside), None);
        assert_eq!(pointer.touch(canvas(), 1, TouchPhase::Moved, vec2(50.0, 50.0)), None);
        assert_eq!(pointer.touch(canvas(), 1, TouchPhase::Ended, outside), None);
    }

    #[test]
    fn ending_a_touch_forwards_the_rest() {
        let mut pointer = Pointer::default();
        let (a, b) = (vec2(20.0, 20.0), vec2(60.0, 60.0));
        pointer.touch(canvas(), 1, TouchPhase::Started, a);
        assert_eq!(
            pointer.touch(canvas(), 2, TouchPhase::Started, b),
            Some((
                Target::Surface(CANVAS),
                InputEvent::TouchStart {
                    touches: vec![a, b],
                }
            ))
        );

        let moved = vec2(70.0, 70.0);
        assert_eq!(
            pointer.touch(canvas(), 2, TouchPhase::Moved, moved),
            Some((
                Target::Surface(CANVAS),
                InputEvent::TouchMove {
                    touches: vec![a, moved],
                }
            ))
        );

        assert_eq!(
            pointer.touch(canvas(), 2, TouchPhase::Ended, moved),
            Some((Target::Surface(CANVAS), InputEvent::TouchEnd { touches: vec![a] }))
        );
        assert_eq!(
            pointer.touch(canvas(), 1, TouchPhase::Cancelled, a),
            Some((Target::Surface(CANVAS), InputEvent::TouchCancel))
        );
        assert_eq!(pointer.touch(canvas(), 1, TouchPhase::Moved, a), None);
    }
}
