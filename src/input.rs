//! Pointer and touch input → stroke segments.
//!
//! The host (the window event loop) feeds raw [`InputEvent`]s into an [`EventHub`]. A surface
//! gets drawing input by [`attach`]ing to the hub, which registers listeners that translate
//! events into [`Segment`]s in the surface's pixel space and hand them to a caller-supplied
//! callback. The pipeline never touches pixels itself.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use crate::math::{Rect, Vec2f};

/// A position in surface-pixel space (or, for raw events, display space).
pub type Point = Vec2f;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u32);

/// Where an event is delivered. Events dispatched to a surface bubble up to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Window,
    Surface(SurfaceId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Primary,
    Secondary,
    Auxiliary,
    Other(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    MouseDown,
    MouseMove,
    MouseUp,
    MouseLeave,
    TouchStart,
    TouchMove,
    TouchEnd,
    TouchCancel,
}

/// Raw input as delivered by the host, positions in display coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    MouseDown { position: Point, button: MouseButton },
    MouseMove { position: Point },
    MouseUp { position: Point },
    /// The pointer left the window.
    MouseLeave,
    /// `touches` lists every active touch point, oldest first.
    TouchStart { touches: Vec<Point> },
    TouchMove { touches: Vec<Point> },
    TouchEnd { touches: Vec<Point> },
    TouchCancel,
}

impl InputEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InputEvent::MouseDown { .. } => EventKind::MouseDown,
            InputEvent::MouseMove { .. } => EventKind::MouseMove,
            InputEvent::MouseUp { .. } => EventKind::MouseUp,
            InputEvent::MouseLeave => EventKind::MouseLeave,
            InputEvent::TouchStart { .. } => EventKind::TouchStart,
            InputEvent::TouchMove { .. } => EventKind::TouchMove,
            InputEvent::TouchEnd { .. } => EventKind::TouchEnd,
            InputEvent::TouchCancel => EventKind::TouchCancel,
        }
    }

    /// Display-space position of the event. Touch events use the first active touch only.
    pub fn position(&self) -> Option<Point> {
        match self {
            InputEvent::MouseDown { position, .. }
            | InputEvent::MouseMove { position }
            | InputEvent::MouseUp { position } => Some(*position),
            InputEvent::TouchStart { touches }
            | InputEvent::TouchMove { touches }
            | InputEvent::TouchEnd { touches } => touches.first().copied(),
            InputEvent::MouseLeave | InputEvent::TouchCancel => None,
        }
    }

    fn button(&self) -> Option<MouseButton> {
        match self {
            InputEvent::MouseDown { button, .. } => Some(*button),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Rc<RefCell<dyn FnMut(&InputEvent) -> anyhow::Result<()>>>;

struct Registration {
    id: ListenerId,
    target: Target,
    kind: EventKind,
    listener: Listener,
}

/// Serial event dispatcher standing in for the host's listener registry.
#[derive(Default)]
pub struct EventHub {
    next_id: Cell<u64>,
    registrations: RefCell<Vec<Registration>>,
}

impl EventHub {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn add_listener(
        &self,
        target: Target,
        kind: EventKind,
        listener: impl FnMut(&InputEvent) -> anyhow::Result<()> + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.registrations.borrow_mut().push(Registration {
            id,
            target,
            kind,
            listener: Rc::new(RefCell::new(listener)),
        });
        id
    }

    /// Returns `false` if no listener with that id was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut registrations = self.registrations.borrow_mut();
        let before = registrations.len();
        registrations.retain(|reg| reg.id != id);
        registrations.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.registrations.borrow().len()
    }

    fn is_registered(&self, id: ListenerId) -> bool {
        self.registrations.borrow().iter().any(|reg| reg.id == id)
    }

    /// Delivers `event` to the listeners of `target`, then (for surface targets) to the
    /// window's listeners.
    ///
    /// Stops at and returns the first error a listener reports.
    pub fn dispatch(&self, target: Target, event: &InputEvent) -> anyhow::Result<()> {
        let kind = event.kind();
        let mut matching: Vec<(ListenerId, Listener)> = Vec::new();
        {
            let registrations = self.registrations.borrow();
            let phases = [Some(target), (target != Target::Window).then_some(Target::Window)];
            for phase in phases.into_iter().flatten() {
                matching.extend(
                    registrations
                        .iter()
                        .filter(|reg| reg.target == phase && reg.kind == kind)
                        .map(|reg| (reg.id, reg.listener.clone())),
                );
            }
        }

        for (id, listener) in matching {
            // A listener earlier in this dispatch may have detached this one.
            if !self.is_registered(id) {
                continue;
            }
            let Ok(mut listener) = listener.try_borrow_mut() else {
                log::warn!("dropping re-entrant {kind:?} event for listener {id:?}");
                continue;
            };
            (&mut *listener)(event)?;
        }
        Ok(())
    }
}

/// Display placement of a surface versus its backing pixel resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// Bounding rectangle of the surface in display coordinates.
    pub display: Rect,
    /// Size of the backing pixel buffer.
    pub pixel_size: Vec2f,
}

impl Geometry {
    /// Maps a display-space position into surface pixels.
    ///
    /// Returns `None` when the surface has no displayed area.
    pub fn to_pixels(&self, position: Point) -> Option<Point> {
        let scale = self.pixel_size / self.display.size;
        let pixel = (position - self.display.origin) * scale;
        pixel.is_finite().then_some(pixel)
    }
}

/// A drawing target that input can be attached to.
pub trait Surface {
    /// Whatever the segment callback needs to render; passed through untouched.
    type Context;

    fn id(&self) -> SurfaceId;

    fn geometry(&self) -> Geometry;

    /// Runs `f` with the drawing context, or returns `None` if there is none.
    fn with_context<R>(&self, f: impl FnOnce(&mut Self::Context) -> R) -> Option<R>;
}

/// One incremental motion sample, paired with the sample before it.
#[derive(Debug)]
pub struct Segment<'a, C> {
    pub context: &'a mut C,
    pub current: Point,
    /// Equal to `current` for the first sample of a stroke.
    pub prev: Point,
}

/// Stroke state of one attached surface.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Session {
    #[default]
    Idle,
    Stroking {
        prev: Point,
    },
}

impl Session {
    pub fn is_active(&self) -> bool {
        matches!(self, Session::Stroking { .. })
    }

    /// Begins a stroke at `at`, returning the `(prev, current)` pair of the initial dot.
    pub fn start(&mut self, at: Point) -> (Point, Point) {
        *self = Session::Stroking { prev: at };
        (at, at)
    }

    /// Extends the current stroke to `at`. Returns `None` while idle.
    pub fn advance(&mut self, at: Point) -> Option<(Point, Point)> {
        match self {
            Session::Idle => None,
            Session::Stroking { prev } => {
                let segment = (*prev, at);
                *prev = at;
                Some(segment)
            }
        }
    }

    pub fn end(&mut self) {
        *self = Session::Idle;
    }
}

fn transition<R>(session: &Cell<Session>, f: impl FnOnce(&mut Session) -> R) -> R {
    let mut s = session.get();
    let r = f(&mut s);
    session.set(s);
    r
}

/// Listener registrations of one surface. Dropping it detaches.
pub struct Attachment {
    hub: Weak<EventHub>,
    listeners: Vec<ListenerId>,
    session: Rc<Cell<Session>>,
}

impl Attachment {
    /// Whether a stroke is in progress, as of the last dispatched event.
    pub fn is_active(&self) -> bool {
        self.session.get().is_active()
    }

    #[cfg(test)]
    pub fn is_attached(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// Removes every listener this attachment registered. Calling it again does nothing.
    pub fn detach(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            for id in self.listeners.drain(..) {
                hub.remove_listener(id);
            }
        }
        self.listeners.clear();
        self.session.set(Session::Idle);
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Starts capturing drawing input for `surface`.
///
/// `on_segment` runs synchronously inside [`EventHub::dispatch`] for the initial pointer-down
/// sample of a stroke and for every move after it; its errors are returned from `dispatch`.
/// If the surface has no drawing context, nothing is registered.
pub fn attach<S, F>(hub: &Rc<EventHub>, surface: Rc<S>, on_segment: F) -> Attachment
where
    S: Surface + 'static,
    F: FnMut(Segment<'_, S::Context>) -> anyhow::Result<()> + 'static,
{
    let session = Rc::new(Cell::new(Session::Idle));
    let mut attachment = Attachment {
        hub: Rc::downgrade(hub),
        listeners: Vec::new(),
        session: session.clone(),
    };

    if surface.with_context(|_| ()).is_none() {
        log::warn!(
            "surface {:?} has no drawing context; not capturing input",
            surface.id()
        );
        return attachment;
    }

    let on_segment = Rc::new(RefCell::new(on_segment));
    let emit = {
        let surface = surface.clone();
        move |(prev, current): (Point, Point)| -> anyhow::Result<()> {
            let mut on_segment = on_segment.borrow_mut();
            surface
                .with_context(|context| {
                    (&mut *on_segment)(Segment {
                        context,
                        current,
                        prev,
                    })
                })
                .unwrap_or(Ok(()))
        }
    };
    let locate = {
        let surface = surface.clone();
        move |event: &InputEvent| -> Option<Point> {
            event
                .position()
                .and_then(|pos| surface.geometry().to_pixels(pos))
        }
    };

    let start = {
        let (session, emit, locate) = (session.clone(), emit.clone(), locate.clone());
        move |event: &InputEvent| -> anyhow::Result<()> {
            if event.button().is_some_and(|b| b != MouseButton::Primary) {
                return Ok(());
            }
            let Some(at) = locate(event) else {
                return Ok(());
            };
            emit(transition(&session, |s| s.start(at)))
        }
    };
    let draw = {
        let (session, emit, locate) = (session.clone(), emit.clone(), locate.clone());
        move |event: &InputEvent| -> anyhow::Result<()> {
            if !session.get().is_active() {
                return Ok(());
            }
            let Some(at) = locate(event) else {
                return Ok(());
            };
            match transition(&session, |s| s.advance(at)) {
                Some(segment) => emit(segment),
                None => Ok(()),
            }
        }
    };
    let stop = {
        let session = session.clone();
        move |_: &InputEvent| -> anyhow::Result<()> {
            transition(&session, Session::end);
            Ok(())
        }
    };

    let on_surface = Target::Surface(surface.id());
    attachment.listeners = vec![
        hub.add_listener(on_surface, EventKind::MouseDown, start.clone()),
        hub.add_listener(on_surface, EventKind::MouseMove, draw.clone()),
        // Releases and leaving the window are observed window-wide, so a button released
        // outside the surface still ends the stroke.
        hub.add_listener(Target::Window, EventKind::MouseUp, stop.clone()),
        hub.add_listener(Target::Window, EventKind::MouseLeave, stop.clone()),
        hub.add_listener(on_surface, EventKind::TouchStart, start),
        hub.add_listener(on_surface, EventKind::TouchMove, draw),
        hub.add_listener(on_surface, EventKind::TouchEnd, stop.clone()),
        hub.add_listener(on_surface, EventKind::TouchCancel, stop),
    ];
    log::debug!(
        "attached drawing input to surface {:?} ({} listeners registered)",
        surface.id(),
        hub.listener_count()
    );

    attachment
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::*;
    use crate::math::vec2;

    type Recorded = Vec<(Point, Point)>;

    struct TestSurface {
        id: SurfaceId,
        geometry: Cell<Geometry>,
        context: RefCell<Option<Recorded>>,
    }

    impl TestSurface {
        fn new(id: u32) -> Rc<Self> {
            Rc::new(Self {
                id: SurfaceId(id),
                geometry: Cell::new(Geometry {
                    display: Rect::new(vec2(0.0, 0.0), vec2(100.0, 100.0)),
                    pixel_size: vec2(100.0, 100.0),
                }),
                context: RefCell::new(Some(Vec::new())),
            })
        }

        fn without_context(id: u32) -> Rc<Self> {
            let surface = Self::new(id);
            *surface.context.borrow_mut() = None;
            surface
        }

        fn segments(&self) -> Recorded {
            self.context.borrow().clone().unwrap_or_default()
        }
    }

    impl Surface for TestSurface {
        type Context = Recorded;

        fn id(&self) -> SurfaceId {
            self.id
        }

        fn geometry(&self) -> Geometry {
            self.geometry.get()
        }

        fn with_context<R>(&self, f: impl FnOnce(&mut Recorded) -> R) -> Option<R> {
            self.context.borrow_mut().as_mut().map(f)
        }
    }

    fn record(segment: Segment<'_, Recorded>) -> anyhow::Result<()> {
        segment.context.push((segment.prev, segment.current));
        Ok(())
    }

    fn down(x: f32, y: f32) -> InputEvent {
        InputEvent::MouseDown {
            position: vec2(x, y),
            button: MouseButton::Primary,
        }
    }

    fn mv(x: f32, y: f32) -> InputEvent {
        InputEvent::MouseMove {
            position: vec2(x, y),
        }
    }

    fn up(x: f32, y: f32) -> InputEvent {
        InputEvent::MouseUp {
            position: vec2(x, y),
        }
    }

    fn on(surface: &TestSurface) -> Target {
        Target::Surface(surface.id)
    }

    #[test]
    fn stroke_yields_one_segment_per_sample() {
        let hub = EventHub::new();
        let surface = TestSurface::new(0);
        let _input = attach(&hub, surface.clone(), record);

        hub.dispatch(on(&surface), &down(1.0, 1.0)).unwrap();
        for i in 2..7 {
            hub.dispatch(on(&surface), &mv(i as f32, 1.0)).unwrap();
        }
        hub.dispatch(on(&surface), &up(6.0, 1.0)).unwrap();

        let segments = surface.segments();
        assert_eq!(segments.len(), 6);
        assert_eq!(segments[0], (vec2(1.0, 1.0), vec2(1.0, 1.0)));
        for pair in segments.windows(2) {
            assert_eq!(pair[0].1, pair[1].0, "segments must chain");
        }
        assert_eq!(segments[5], (vec2(5.0, 1.0), vec2(6.0, 1.0)));
    }

    #[test]
    fn activity_tracks_stroke_lifetime() {
        let hub = EventHub::new();
        let surface = TestSurface::new(0);
        let input = attach(&hub, surface.clone(), record);

        assert!(!input.is_active());
        hub.dispatch(on(&surface), &down(1.0, 1.0)).unwrap();
        assert!(input.is_active());
        hub.dispatch(on(&surface), &mv(2.0, 1.0)).unwrap();
        assert!(input.is_active());
        hub.dispatch(on(&surface), &up(2.0, 1.0)).unwrap();
        assert!(!input.is_active());

        for end in [InputEvent::MouseLeave, InputEvent::TouchCancel] {
            hub.dispatch(on(&surface), &down(1.0, 1.0)).unwrap();
            assert!(input.is_active());
            let target = match end {
                InputEvent::MouseLeave => Target::Window,
                _ => on(&surface),
            };
            hub.dispatch(target, &end).unwrap();
            assert!(!input.is_active(), "{end:?} should end the stroke");
        }
    }

    #[test]
    fn display_coordinates_are_scaled_to_pixels() {
        let geometry = Geometry {
            display: Rect::new(vec2(0.0, 0.0), vec2(640.0, 360.0)),
            pixel_size: vec2(1280.0, 720.0),
        };
        assert_eq!(geometry.to_pixels(vec2(320.0, 180.0)), Some(vec2(640.0, 360.0)));

        let offset = Geometry {
            display: Rect::new(vec2(100.0, 50.0), vec2(640.0, 360.0)),
            pixel_size: vec2(1280.0, 720.0),
        };
        assert_eq!(offset.to_pixels(vec2(110.0, 60.0)), Some(vec2(20.0, 20.0)));

        let collapsed = Geometry {
            display: Rect::new(vec2(0.0, 0.0), vec2(0.0, 360.0)),
            pixel_size: vec2(1280.0, 720.0),
        };
        assert_eq!(collapsed.to_pixels(vec2(0.0, 0.0)), None);
    }

    #[test]
    fn segments_arrive_in_pixel_space() {
        let hub = EventHub::new();
        let surface = TestSurface::new(0);
        surface.geometry.set(Geometry {
            display: Rect::new(vec2(0.0, 0.0), vec2(640.0, 360.0)),
            pixel_size: vec2(1280.0, 720.0),
        });
        let _input = attach(&hub, surface.clone(), record);

        hub.dispatch(on(&surface), &down(320.0, 180.0)).unwrap();
        assert_eq!(surface.segments(), [(vec2(640.0, 360.0), vec2(640.0, 360.0))]);
    }

    #[test]
    fn release_outside_surface_ends_stroke() {
        let hub = EventHub::new();
        let surface = TestSurface::new(0);
        let input = attach(&hub, surface.clone(), record);

        hub.dispatch(on(&surface), &down(10.0, 10.0)).unwrap();
        hub.dispatch(Target::Window, &up(500.0, 500.0)).unwrap();
        assert!(!input.is_active());

        // A later press must not connect to the stale point.
        hub.dispatch(on(&surface), &down(50.0, 50.0)).unwrap();
        assert_eq!(
            surface.segments().last(),
            Some(&(vec2(50.0, 50.0), vec2(50.0, 50.0)))
        );
    }

    #[test]
    fn touch_without_points_is_ignored() {
        let hub = EventHub::new();
        let surface = TestSurface::new(0);
        let input = attach(&hub, surface.clone(), record);

        hub.dispatch(on(&surface), &InputEvent::TouchStart { touches: vec![] })
            .unwrap();
        assert!(!input.is_active());
        assert!(surface.segments().is_empty());

        hub.dispatch(
            on(&surface),
            &InputEvent::TouchStart {
                touches: vec![vec2(5.0, 5.0), vec2(90.0, 90.0)],
            },
        )
        .unwrap();
        hub.dispatch(on(&surface), &InputEvent::TouchMove { touches: vec![] })
            .unwrap();
        assert!(input.is_active());
        assert_eq!(surface.segments(), [(vec2(5.0, 5.0), vec2(5.0, 5.0))]);

        hub.dispatch(
            on(&surface),
            &InputEvent::TouchMove {
                touches: vec![vec2(6.0, 5.0), vec2(80.0, 80.0)],
            },
        )
        .unwrap();
        hub.dispatch(on(&surface), &InputEvent::TouchEnd { touches: vec![] })
            .unwrap();
        assert!(!input.is_active());
        assert_eq!(surface.segments()[1], (vec2(5.0, 5.0), vec2(6.0, 5.0)));
    }

    #[test]
    fn detach_removes_all_listeners() {
        let hub = EventHub::new();
        let surface = TestSurface::new(0);
        let mut input = attach(&hub, surface.clone(), record);
        assert!(input.is_attached());
        assert_eq!(hub.listener_count(), 8);

        hub.dispatch(on(&surface), &down(1.0, 1.0)).unwrap();
        input.detach();
        input.detach();
        assert_eq!(hub.listener_count(), 0);
        assert!(!input.is_active());

        hub.dispatch(on(&surface), &mv(2.0, 2.0)).unwrap();
        hub.dispatch(on(&surface), &down(3.0, 3.0)).unwrap();
        assert_eq!(surface.segments().len(), 1);
    }

    #[test]
    fn dropping_attachment_detaches() {
        let hub = EventHub::new();
        let surface = TestSurface::new(0);
        drop(attach(&hub, surface.clone(), record));
        assert_eq!(hub.listener_count(), 0);
        hub.dispatch(on(&surface), &down(1.0, 1.0)).unwrap();
        assert!(surface.segments().is_empty());
    }

    #[test]
    fn non_primary_buttons_do_not_draw() {
        let hub = EventHub::new();
        let surface = TestSurface::new(0);
        let input = attach(&hub, surface.clone(), record);

        for button in [
            MouseButton::Secondary,
            MouseButton::Auxiliary,
            MouseButton::Other(4),
        ] {
            let event = InputEvent::MouseDown {
                position: vec2(1.0, 1.0),
                button,
            };
            hub.dispatch(on(&surface), &event).unwrap();
            hub.dispatch(on(&surface), &mv(2.0, 2.0)).unwrap();
            assert!(!input.is_active());
        }
        assert!(surface.segments().is_empty());
    }

    #[test]
    fn hover_is_a_no_op() {
        let hub = EventHub::new();
        let surface = TestSurface::new(0);
        let input = attach(&hub, surface.clone(), record);
        hub.dispatch(on(&surface), &mv(2.0, 2.0)).unwrap();
        assert!(!input.is_active());
        assert!(surface.segments().is_empty());
    }

    #[test]
    fn surface_without_context_is_never_attached() {
        let hub = EventHub::new();
        let surface = TestSurface::without_context(0);
        let input = attach(&hub, surface.clone(), record);
        assert!(!input.is_attached());
        assert_eq!(hub.listener_count(), 0);
        hub.dispatch(on(&surface), &down(1.0, 1.0)).unwrap();
        assert!(!input.is_active());
    }

    #[test]
    fn callback_errors_reach_the_dispatcher() {
        let hub = EventHub::new();
        let surface = TestSurface::new(0);
        let _input = attach(&hub, surface.clone(), |_: Segment<'_, Recorded>| {
            bail!("render failed")
        });
        let err = hub.dispatch(on(&surface), &down(1.0, 1.0)).unwrap_err();
        assert_eq!(err.to_string(), "render failed");
    }

    #[test]
    fn surfaces_have_independent_sessions() {
        let hub = EventHub::new();
        let a = TestSurface::new(0);
        let b = TestSurface::new(1);
        let input_a = attach(&hub, a.clone(), record);
        let input_b = attach(&hub, b.clone(), record);

        hub.dispatch(on(&a), &down(1.0, 1.0)).unwrap();
        assert!(input_a.is_active());
        assert!(!input_b.is_active());

        hub.dispatch(on(&b), &mv(3.0, 3.0)).unwrap();
        assert!(b.segments().is_empty());

        // Window-level release ends every stroke.
        hub.dispatch(on(&b), &up(3.0, 3.0)).unwrap();
        assert!(!input_a.is_active());
    }

    #[test]
    fn session_transitions() {
        let mut session = Session::default();
        assert_eq!(session.advance(vec2(1.0, 1.0)), None);
        assert_eq!(session.start(vec2(2.0, 2.0)), (vec2(2.0, 2.0), vec2(2.0, 2.0)));
        assert_eq!(
            session.advance(vec2(3.0, 2.0)),
            Some((vec2(2.0, 2.0), vec2(3.0, 2.0)))
        );
        session.end();
        assert_eq!(session, Session::Idle);
    }
}
