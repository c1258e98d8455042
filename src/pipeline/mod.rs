//! Guarded run of the visual-parsing pipeline.
//!
//! The models themselves live behind [`TextRecognizer`], [`RegionDetector`]
//! and [`Captioner`]; this module only decides how they are called. OCR
//! always sees the full-resolution image.

pub mod instrument;

use std::fmt;

use image::DynamicImage;
use serde::Serialize;
use tracing::info;

use crate::error::{BoxError, PipelineError};
use crate::guard::{GuardDecision, OcrEngine, PaddleLimits};
use crate::hooks::GuardLayer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TextRecognition,
    Detection,
    Caption,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::TextRecognition => "ocr",
            Stage::Detection => "detection",
            Stage::Caption => "caption",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel-space box, origin top-left.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub score: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TextBox {
    pub region: Region,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptionedRegion {
    pub region: Region,
    pub caption: String,
}

/// Parameters the guard hands to the text recognizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OcrParams {
    pub engine: OcrEngine,
    pub paddle: Option<PaddleLimits>,
}

pub trait TextRecognizer {
    fn recognize(&self, image: &DynamicImage, params: &OcrParams) -> Result<Vec<TextBox>, BoxError>;
}

pub trait RegionDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Region>, BoxError>;
}

pub trait Captioner {
    /// One caption per crop, in order.
    fn caption(&self, crops: &[DynamicImage]) -> Result<Vec<String>, BoxError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseRequest {
    pub ocr_engine: OcrEngine,
    pub use_ocr: bool,
}

impl Default for ParseRequest {
    fn default() -> Self {
        ParseRequest {
            ocr_engine: OcrEngine::Paddle,
            use_ocr: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParseOutput {
    pub decision: GuardDecision,
    pub text: Vec<TextBox>,
    pub regions: Vec<CaptionedRegion>,
}

pub struct Pipeline<R, D, C> {
    recognizer: R,
    detector: D,
    captioner: C,
}

impl<R, D, C> Pipeline<R, D, C>
where
    R: TextRecognizer,
    D: RegionDetector,
    C: Captioner,
{
    pub fn new(recognizer: R, detector: D, captioner: C) -> Self {
        Pipeline {
            recognizer,
            detector,
            captioner,
        }
    }

    /// Run one request under the guard.
    ///
    /// The request scope opened here runs the final cleanup when it drops,
    /// so every return path, early `?` included, releases exactly once.
    pub fn run(
        &self,
        layer: &GuardLayer,
        image: &DynamicImage,
        request: &ParseRequest,
    ) -> Result<ParseOutput, PipelineError> {
        let scope = layer.on_request_start(request.ocr_engine);
        let decision = scope.decision().clone();
        let instrument = layer.instrument();

        let text = if request.use_ocr {
            let params = OcrParams {
                engine: decision.ocr_engine,
                paddle: decision.paddle,
            };
            let result = instrument.run(Stage::TextRecognition, params.engine.label(), || {
                self.recognizer.recognize(image, &params)
            });
            layer.cleaner().cleanup("after ocr");
            result.map_err(|source| PipelineError::Stage {
                stage: Stage::TextRecognition,
                source,
            })?
        } else {
            Vec::new()
        };

        let detected = instrument
            .run(Stage::Detection, "full", || self.detector.detect(image))
            .map_err(|source| PipelineError::Stage {
                stage: Stage::Detection,
                source,
            })?;

        let regions = self.caption_regions(layer, image, &detected, decision.caption_batch_size)?;

        info!(
            ocr_engine = %decision.ocr_engine,
            text_boxes = text.len(),
            regions = regions.len(),
            "request parsed"
        );
        layer.on_request_end(scope);

        Ok(ParseOutput {
            decision,
            text,
            regions,
        })
    }

    fn caption_regions(
        &self,
        layer: &GuardLayer,
        image: &DynamicImage,
        detected: &[Region],
        batch_size: usize,
    ) -> Result<Vec<CaptionedRegion>, PipelineError> {
        let batch_size = batch_size.max(1);
        let total = detected.len().div_ceil(batch_size);
        let instrument = layer.instrument();
        let mut out = Vec::with_capacity(detected.len());

        for (i, batch) in detected.chunks(batch_size).enumerate() {
            let label = format!("batch {}/{}", i + 1, total);
            // Crops exist only for the batch being captioned.
            let crops = batch
                .iter()
                .enumerate()
                .map(|(j, region)| crop(image, region, i * batch_size + j))
                .collect::<Result<Vec<_>, _>>()?;

            let result = instrument.run(Stage::Caption, &label, || self.captioner.caption(&crops));
            drop(crops);
            layer.cleaner().cleanup(&format!("after caption {label}"));

            let captions = result.map_err(|source| PipelineError::Stage {
                stage: Stage::Caption,
                source,
            })?;
            if captions.len() != batch.len() {
                return Err(PipelineError::CaptionCountMismatch {
                    expected: batch.len(),
                    got: captions.len(),
                });
            }
            out.extend(
                batch
                    .iter()
                    .zip(captions)
                    .map(|(region, caption)| CaptionedRegion {
                        region: *region,
                        caption,
                    }),
            );
        }

        Ok(out)
    }
}

/// Crop `region`, clipped to the image. A region with nothing left after
/// clipping is an error.
fn crop(image: &DynamicImage, region: &Region, index: usize) -> Result<DynamicImage, PipelineError> {
    let (iw, ih) = (image.width(), image.height());
    let x_end = region.x.saturating_add(region.width).min(iw);
    let y_end = region.y.saturating_add(region.height).min(ih);
    if region.x >= x_end || region.y >= y_end {
        return Err(PipelineError::RegionOutOfBounds {
            index,
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
            image_width: iw,
            image_height: ih,
        });
    }
    Ok(image.crop_imm(region.x, region.y, x_end - region.x, y_end - region.y))
}
