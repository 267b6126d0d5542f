#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Info,
    Success,
    Destructive,
}

/// A short notification for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub description: String,
    pub variant: Variant,
}

impl Toast {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, description, Variant::Info)
    }

    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, description, Variant::Success)
    }

    pub fn destructive(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, description, Variant::Destructive)
    }

    fn new(title: impl Into<String>, description: impl Into<String>, variant: Variant) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant,
        }
    }

    pub fn present(&self) {
        match self.variant {
            Variant::Destructive => log::warn!("{}: {}", self.title, self.description),
            Variant::Info | Variant::Success => log::info!("{}: {}", self.title, self.description),
        }
    }
}
