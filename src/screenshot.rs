use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Bmp24,
    Bmp8,
    Png,
    Jpeg,
    Tiff,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bmp24 => "BMP24",
            Self::Bmp8 => "BMP8",
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::Tiff => "TIFF",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Bmp24 | Self::Bmp8 => "bmp",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Tiff => "tiff",
        }
    }

    /// Guess the format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "tif" | "tiff" => Some(Self::Tiff),
            "bmp" | "bmp24" => Some(Self::Bmp24),
            "bmp8" => Some(Self::Bmp8),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Recognise an image by its magic bytes. BMP depth is not inspected.
    pub fn sniff(image: &[u8]) -> Option<Self> {
        match image {
            [0x89, b'P', b'N', b'G', ..] => Some(Self::Png),
            [0xFF, 0xD8, ..] => Some(Self::Jpeg),
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(Self::Tiff),
            [b'B', b'M', ..] => Some(Self::Bmp24),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenshotOptions {
    /// `None` lets the instrument pick its default format
    pub format: Option<ImageFormat>,
    pub color: bool,
    pub invert: bool,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            format: None,
            color: true,
            invert: false,
        }
    }
}

impl ScreenshotOptions {
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn monochrome(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn command(&self) -> String {
        let color = if self.color { "ON" } else { "OFF" };
        let invert = if self.invert { "ON" } else { "OFF" };
        match self.format {
            Some(format) => format!(":DISPlay:DATA? {},{},{}", color, invert, format.as_str()),
            None => format!(":DISPlay:DATA? {},{}", color, invert),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command() {
        assert_eq!(ScreenshotOptions::default().command(), ":DISPlay:DATA? ON,OFF");
        assert_eq!(
            ScreenshotOptions::default()
                .with_format(ImageFormat::Png)
                .monochrome()
                .inverted()
                .command(),
            ":DISPlay:DATA? OFF,ON,PNG"
        );
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ImageFormat::from_path(Path::new("shot.PNG")), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_path(Path::new("/tmp/a.jpeg")), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_path(Path::new("scope.tif")), Some(ImageFormat::Tiff));
        assert_eq!(ImageFormat::from_path(Path::new("scope.gif")), None);
        assert_eq!(ImageFormat::from_path(Path::new("scope")), None);
    }

    #[test]
    fn test_sniff() {
        assert_eq!(ImageFormat::sniff(b"\x89PNG\r\n\x1a\n"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(b"BM6\x0c"), Some(ImageFormat::Bmp24));
        assert_eq!(ImageFormat::sniff(b"\xff\xd8\xff\xe0"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(b"II*\x00"), Some(ImageFormat::Tiff));
        assert_eq!(ImageFormat::sniff(b""), None);
    }
}
