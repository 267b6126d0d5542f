use crate::{actions::JobKind, datauri::DataUri};

#[derive(Debug)]
pub enum Cmd {
    Clear,

    SetTool {
        tool: Tool,
    },

    /// Switches the pen to the next color of the configured palette.
    CycleColor,

    AdjustWidth {
        delta: f32,
    },

    /// Sends the drawing to the enhancement service.
    Enhance,

    /// Generates a diagram from the template at this index.
    Generate {
        template: usize,
    },

    /// Starts typing a free-form generation prompt.
    EditPrompt,

    ToggleResultPanel,

    /// A service request finished; posted from its worker thread.
    JobDone {
        job: JobKind,
        result: Result<DataUri, String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Pen,
    /// Removes ink instead of adding it.
    Eraser,
}
