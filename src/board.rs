//! Whiteboard state behind the window: the drawing surface, tools and diagram requests.

use std::{cell::Cell, rc::Rc};

use image::RgbaImage;

use crate::{
    actions::{Job, JobKind},
    canvas::{Brush, Canvas, Raster},
    cmd::{Cmd, Tool},
    config::{self, Config, Template},
    datauri::DataUri,
    input::{self, Attachment, EventHub, InputEvent, Segment, SurfaceId, Target},
    math::Rect,
    toast::Toast,
};

/// The whiteboard's drawing surface.
pub const CANVAS: SurfaceId = SurfaceId(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptEdit {
    Insert(String),
    Backspace,
    Submit,
    Cancel,
}

pub struct Board {
    hub: Rc<EventHub>,
    canvas: Rc<Canvas>,
    input: Attachment,
    brush: Rc<Cell<Brush>>,
    palette: Vec<[u8; 4]>,
    templates: Vec<Template>,

    /// The request currently in flight; at most one at a time.
    pending: Option<JobKind>,
    result: Option<RgbaImage>,
    result_dirty: bool,
    result_visible: bool,

    prompt: String,
    editing_prompt: bool,

    toasts: Vec<Toast>,
    last_toast: Option<Toast>,
}

impl Board {
    pub fn new(config: &Config) -> Self {
        let hub = EventHub::new();
        let canvas = Rc::new(Canvas::new(CANVAS, config.canvas.width, config.canvas.height));
        let brush = Rc::new(Cell::new(Brush {
            tool: Tool::Pen,
            color: config.brush.color.0,
            width: config.brush.width,
        }));

        let input = input::attach(&hub, canvas.clone(), {
            let brush = brush.clone();
            let canvas = canvas.clone();
            move |segment: Segment<'_, Raster>| {
                brush.get().render(segment);
                canvas.mark_dirty();
                Ok(())
            }
        });

        Self {
            hub,
            canvas,
            input,
            brush,
            palette: config.brush.palette.iter().map(|c| c.0).collect(),
            templates: config.templates.clone(),
            pending: None,
            result: None,
            result_dirty: true,
            result_visible: true,
            prompt: String::new(),
            editing_prompt: false,
            toasts: Vec::new(),
            last_toast: None,
        }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn set_canvas_layout(&self, display: Rect) {
        self.canvas.set_layout(display);
    }

    pub fn dispatch(&self, target: Target, event: &InputEvent) -> anyhow::Result<()> {
        self.hub.dispatch(target, event)
    }

    pub fn brush(&self) -> Brush {
        self.brush.get()
    }

    pub fn is_drawing(&self) -> bool {
        self.input.is_active()
    }

    pub fn pending(&self) -> Option<JobKind> {
        self.pending
    }

    pub fn result(&self) -> Option<&RgbaImage> {
        self.result.as_ref()
    }

    /// Returns whether the result image changed since the last call.
    pub fn take_result_dirty(&mut self) -> bool {
        std::mem::take(&mut self.result_dirty)
    }

    pub fn result_visible(&self) -> bool {
        self.result_visible
    }

    pub fn is_editing_prompt(&self) -> bool {
        self.editing_prompt
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn take_toasts(&mut self) -> Vec<Toast> {
        std::mem::take(&mut self.toasts)
    }

    /// Applies a command. Returns the request to start, if the command produced one.
    pub fn apply(&mut self, cmd: Cmd) -> Option<Job> {
        match cmd {
            Cmd::Clear => self.clear(),
            Cmd::SetTool { tool } => self.update_brush(|brush| brush.tool = tool),
            Cmd::CycleColor => {
                if self.palette.is_empty() {
                    return None;
                }
                let current = self.brush().color;
                let next = self
                    .palette
                    .iter()
                    .position(|&c| c == current)
                    .map_or(0, |i| (i + 1) % self.palette.len());
                let color = self.palette[next];
                self.update_brush(|brush| brush.color = color);
            }
            Cmd::AdjustWidth { delta } => {
                self.update_brush(|brush| brush.set_width(brush.width + delta))
            }
            Cmd::Enhance => return self.enhance(),
            Cmd::Generate { template } => {
                let Some(template) = self.templates.get(template) else {
                    log::warn!("no template with index {template}");
                    return None;
                };
                log::info!("generating from template '{}'", template.name);
                let prompt = template.prompt.clone();
                return self.generate(prompt);
            }
            Cmd::EditPrompt => {
                self.editing_prompt = true;
                self.notify(Toast::info(
                    "Describe Your Diagram",
                    "Type a prompt, Enter to generate, Escape to cancel.",
                ));
            }
            Cmd::ToggleResultPanel => {
                self.result_visible = !self.result_visible;
            }
            Cmd::JobDone { job, result } => self.finish(job, result),
        }
        None
    }

    pub fn edit_prompt(&mut self, edit: PromptEdit) -> Option<Job> {
        match edit {
            PromptEdit::Insert(text) => {
                self.prompt.extend(text.chars().filter(|c| !c.is_control()));
            }
            PromptEdit::Backspace => {
                self.prompt.pop();
            }
            PromptEdit::Submit => {
                self.editing_prompt = false;
                return self.generate(self.prompt.clone());
            }
            PromptEdit::Cancel => self.editing_prompt = false,
        }
        None
    }

    /// One-line summary of the board for the window title.
    pub fn status_line(&self) -> String {
        let brush = self.brush();
        let tool = match brush.tool {
            Tool::Pen => format!("Pen {}px {}", brush.width, config::Color(brush.color)),
            Tool::Eraser => format!("Eraser {}px", brush.tip_width()),
        };
        let mut status = format!("Clarity Board | {tool}");
        match self.pending() {
            Some(JobKind::Enhance) => status.push_str(" | Enhancing..."),
            Some(JobKind::Generate) => status.push_str(" | Generating..."),
            None => {}
        }
        if self.editing_prompt {
            status.push_str(&format!(" | Prompt: {}_", self.prompt()));
        } else if let Some(toast) = &self.last_toast {
            status.push_str(&format!(" | {}: {}", toast.title, toast.description));
        }
        status
    }

    fn update_brush(&self, f: impl FnOnce(&mut Brush)) {
        let mut brush = self.brush.get();
        f(&mut brush);
        self.brush.set(brush);
    }

    fn notify(&mut self, toast: Toast) {
        self.last_toast = Some(toast.clone());
        self.toasts.push(toast);
    }

    fn clear(&mut self) {
        if self.is_drawing() {
            self.notify(Toast::destructive(
                "Still Drawing",
                "Please finish your drawing before clearing.",
            ));
            return;
        }
        log::info!("clearing canvas");
        self.canvas.clear();
        self.result = None;
        self.result_dirty = true;
    }

    fn reject_if_busy(&mut self) -> bool {
        if self.pending.is_none() {
            return false;
        }
        self.notify(Toast::destructive(
            "Busy",
            "Please wait for the current diagram to finish.",
        ));
        true
    }

    fn enhance(&mut self) -> Option<Job> {
        if self.is_drawing() {
            self.notify(Toast::destructive(
                "Still Drawing",
                "Please finish your drawing before enhancing.",
            ));
            return None;
        }
        if self.reject_if_busy() {
            return None;
        }

        let diagram = {
            let raster = self.canvas.raster();
            if raster.is_blank() {
                None
            } else {
                Some(raster.to_data_uri())
            }
        };
        match diagram {
            None => {
                self.notify(Toast::destructive(
                    "Canvas is Empty",
                    "Please draw something before enhancing.",
                ));
                None
            }
            Some(Err(e)) => {
                self.notify(Toast::destructive("Enhancement Failed", e.to_string()));
                None
            }
            Some(Ok(diagram)) => Some(self.begin(Job::Enhance(diagram))),
        }
    }

    fn generate(&mut self, prompt: String) -> Option<Job> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            self.notify(Toast::destructive(
                "Prompt is Empty",
                "Please describe the diagram you want to generate.",
            ));
            return None;
        }
        if self.reject_if_busy() {
            return None;
        }
        Some(self.begin(Job::Generate(prompt.to_owned())))
    }

    fn begin(&mut self, job: Job) -> Job {
        self.pending = Some(job.kind());
        self.result = None;
        self.result_dirty = true;
        self.last_toast = None;
        job
    }

    fn finish(&mut self, job: JobKind, result: Result<DataUri, String>) {
        if self.pending != Some(job) {
            log::warn!("{job:?} result arrived while {:?} was pending", self.pending);
        }
        self.pending = None;

        let (failed, done, description) = match job {
            JobKind::Enhance => (
                "Enhancement Failed",
                "Diagram Enhanced!",
                "The AI has successfully redrawn your diagram.",
            ),
            JobKind::Generate => (
                "Generation Failed",
                "Diagram Generated!",
                "The AI has successfully generated your diagram.",
            ),
        };

        let image = result.and_then(|uri| {
            uri.decode_image()
                .map_err(|e| format!("The AI model returned an unreadable image: {e}"))
        });
        match image {
            Ok(image) => {
                log::debug!("result image is {}x{}", image.width(), image.height());
                self.result = Some(image);
                self.result_dirty = true;
                self.result_visible = true;
                self.notify(Toast::success(done, description));
            }
            Err(message) => self.notify(Toast::destructive(failed, message)),
        }
    }
}
