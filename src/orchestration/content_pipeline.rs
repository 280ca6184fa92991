// Content Pipeline: sequences extraction, text removal, translation and
// compositing for one image across its target languages.
//
// Per image:     created -> text-extracted -> background cleaned (once)
// Per language:  translating -> compositing -> done | failed
//
// The mask depends only on the OCR boxes, so the cleaned background is shared
// by every target language of the request.

use anyhow::Result;
use futures::future::join_all;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use crate::core::config::{Config, RenderingConfig};
use crate::core::errors::{AdmissionError, ErrorContext, PipelineError, PipelineResult};
use crate::core::languages::Language;
use crate::core::types::{
    ExtractedRegions, FallbackReason, FontStyle, ImageContent, LanguageFailure,
    Outcome, PostSchedule, ProcessImageRequest, ProcessImageResponse, QuoteImageRequest,
    QuoteImageResponse, RegenerateImageRequest, RegenerateImageResponse, SchedulePostRequest,
    SchedulePostResponse, TranslateImageRequest, TranslatedContent,
};
use crate::middleware::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
use crate::middleware::rate_limiter::RateLimiter;
use crate::orchestration::state_store::StateStore;
use crate::phases::phase4::text_to_draw;
use crate::phases::{Phase1Pipeline, Phase2Pipeline, Phase3Pipeline, Phase4Pipeline};
use crate::services::captioning::{describe_background, Captioner, HttpCaptioner};
use crate::services::generation::{ImageGenerator, PromptImageClient};
use crate::services::inpainting::{HttpInpainter, Inpainter};
use crate::services::ocr::{OcrEngine, TesseractOcr};
use crate::services::rendering::{Placement, TextRenderer};
use crate::services::scheduler::PostScheduler;
use crate::services::translation::TranslationAdapter;
use crate::utils::{load_image_async, Metrics};

const CENTERED_TEXT_COLOR: &str = "#FFFFFF";

/// How one language's text is composited
#[derive(Clone, Copy)]
struct Composite<'a> {
    style: &'a FontStyle,
    placement: Placement,
    prefix: &'static str,
    /// Swap `|` for the target script's clause mark before translating
    localize_separators: bool,
}

/// Main pipeline object, constructed once at start-up and shared by handlers
pub struct ContentPipeline {
    phase1: Phase1Pipeline,
    phase2: Phase2Pipeline,
    phase3: Phase3Pipeline,
    phase4: Phase4Pipeline,
    scheduler: PostScheduler,
    admission: RateLimiter,
    request_semaphore: Arc<Semaphore>,
    captioner: Option<Arc<dyn Captioner>>,
    generator: Option<Arc<dyn ImageGenerator>>,
    store: Arc<StateStore>,
    breakers: Vec<CircuitBreaker>,
    metrics: Metrics,
    default_style: FontStyle,
    centered_font_size: f32,
}

/// Assembles a [`ContentPipeline`] from capability implementations.
///
/// Everything except OCR defaults to "unavailable", so tests only plug in
/// what they exercise.
pub struct ContentPipelineBuilder {
    ocr: Arc<dyn OcrEngine>,
    translation: TranslationAdapter,
    inpainter: Option<Arc<dyn Inpainter>>,
    captioner: Option<Arc<dyn Captioner>>,
    generator: Option<Arc<dyn ImageGenerator>>,
    admission: RateLimiter,
    confidence_threshold: f32,
    rendering: RenderingConfig,
    output_dir: PathBuf,
    max_concurrent_requests: usize,
    breakers: Vec<CircuitBreaker>,
    metrics: Metrics,
}

impl ContentPipelineBuilder {
    pub fn translation(mut self, adapter: TranslationAdapter) -> Self {
        self.translation = adapter;
        self
    }

    pub fn inpainter(mut self, inpainter: Arc<dyn Inpainter>) -> Self {
        self.inpainter = Some(inpainter);
        self
    }

    pub fn captioner(mut self, captioner: Arc<dyn Captioner>) -> Self {
        self.captioner = Some(captioner);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn ImageGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn admission(mut self, admission: RateLimiter) -> Self {
        self.admission = admission;
        self
    }

    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Report this breaker's state in [`ContentPipeline::breaker_stats`]
    pub fn watch_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breakers.push(breaker);
        self
    }

    pub fn build(self) -> ContentPipeline {
        let metrics = self.metrics;
        let renderer = Arc::new(TextRenderer::new(&self.rendering));

        let phase1 = Phase1Pipeline::new(self.ocr, self.confidence_threshold)
            .with_metrics(metrics.clone());
        let phase2 = Phase2Pipeline::new(Arc::new(self.translation.with_metrics(metrics.clone())))
            .with_metrics(metrics.clone());
        let phase3 = Phase3Pipeline::new(self.inpainter).with_metrics(metrics.clone());
        let phase4 = Phase4Pipeline::new(renderer, &self.rendering, &self.output_dir)
            .with_metrics(metrics.clone());

        ContentPipeline {
            phase1,
            phase2,
            phase3,
            phase4,
            scheduler: PostScheduler::new(),
            admission: self.admission,
            request_semaphore: Arc::new(Semaphore::new(self.max_concurrent_requests.max(1))),
            captioner: self.captioner,
            generator: self.generator,
            store: Arc::new(StateStore::new()),
            breakers: self.breakers,
            metrics,
            default_style: FontStyle {
                family: self.rendering.default_font_family.clone(),
                size: self.rendering.default_font_size,
                color: self.rendering.default_font_color.clone(),
            },
            centered_font_size: self.rendering.centered_font_size,
        }
    }
}

impl ContentPipeline {
    pub fn builder(ocr: Arc<dyn OcrEngine>, config: &Config) -> ContentPipelineBuilder {
        ContentPipelineBuilder {
            ocr,
            translation: TranslationAdapter::disabled(),
            inpainter: None,
            captioner: None,
            generator: None,
            admission: RateLimiter::from_config(&config.rate_limit),
            confidence_threshold: config.confidence_threshold(),
            rendering: config.rendering.clone(),
            output_dir: config.output_dir().to_path_buf(),
            max_concurrent_requests: config.pipeline.max_concurrent_requests,
            breakers: Vec::new(),
            metrics: Metrics::new(),
        }
    }

    /// Wire the real capability clients described by `config`
    #[instrument(skip_all)]
    pub fn from_config(config: &Config, metrics: Metrics) -> Result<Self> {
        info!("Initializing services...");
        let breaker = |name: &'static str| CircuitBreaker::new(name, (&config.circuit_breaker).into());

        let translation_breaker = breaker("translation");
        let mut builder = Self::builder(Arc::new(TesseractOcr::new(&config.ocr)), config)
            .translation(TranslationAdapter::from_config(config, translation_breaker.clone())?)
            .watch_breaker(translation_breaker)
            .metrics(metrics.clone());

        match &config.inpainting.endpoint {
            Some(endpoint) => {
                let inpainting_breaker = breaker("inpainting");
                builder = builder
                    .inpainter(Arc::new(
                        HttpInpainter::new(endpoint.clone(), config.inpainting.timeout, inpainting_breaker.clone())?
                            .with_metrics(metrics.clone()),
                    ))
                    .watch_breaker(inpainting_breaker);
            }
            None => warn!("INPAINTING_ENDPOINT not set, text will be drawn over the original background"),
        }

        if let Some(endpoint) = &config.captioning.endpoint {
            let captioning_breaker = breaker("captioning");
            builder = builder
                .captioner(Arc::new(
                    HttpCaptioner::new(
                        endpoint.clone(),
                        config.captioning.api_key.clone(),
                        config.captioning.model.clone(),
                        captioning_breaker.clone(),
                    )?
                    .with_metrics(metrics.clone()),
                ))
                .watch_breaker(captioning_breaker);
        }

        if let Some(base_url) = &config.generation.base_url {
            let generation_breaker = breaker("generation");
            builder = builder
                .generator(Arc::new(
                    PromptImageClient::new(base_url.clone(), config.generation.timeout, generation_breaker.clone())?
                        .with_metrics(metrics.clone()),
                ))
                .watch_breaker(generation_breaker);
        }

        info!(
            "✓ Ready (translation: {:?}, inpainting: {}, captioning: {}, generation: {}, concurrency: {})",
            config.translation.backend,
            builder.inpainter.is_some(),
            builder.captioner.is_some(),
            builder.generator.is_some(),
            config.pipeline.max_concurrent_requests
        );
        Ok(builder.build())
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn default_style(&self) -> &FontStyle {
        &self.default_style
    }

    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers.iter().map(CircuitBreaker::stats).collect()
    }

    /// Requests `identity` may still make in its current window
    pub fn remaining_budget(&self, identity: &str) -> u32 {
        self.admission.remaining(identity)
    }

    /// Callers with a live rate-limit window
    pub fn tracked_clients(&self) -> usize {
        self.admission.tracked_identities()
    }

    // ===== Transport entry points (admission first, then work) =====

    fn admit(&self, identity: &str) -> Result<(), AdmissionError> {
        self.admission.check(identity).inspect_err(|_| {
            self.metrics.record_admission_rejection();
        })
    }

    fn style_from(&self, requested: Option<&std::collections::HashMap<String, String>>) -> FontStyle {
        requested
            .map(FontStyle::from_map)
            .unwrap_or_else(|| self.default_style.clone())
    }

    pub async fn handle_process(
        &self,
        identity: &str,
        request: &ProcessImageRequest,
    ) -> Result<ProcessImageResponse, AdmissionError> {
        self.admit(identity)?;
        let style = self.style_from(request.font_style.as_ref());
        Ok(self
            .process_image(
                &request.image_path,
                request.source_language,
                &request.target_languages,
                &style,
            )
            .await)
    }

    pub async fn handle_translate(
        &self,
        identity: &str,
        request: &TranslateImageRequest,
    ) -> Result<PipelineResult<TranslatedContent>, AdmissionError> {
        self.admit(identity)?;
        let style = self.style_from(request.font_style.as_ref());
        Ok(self
            .translate_image(&request.image_id, request.target_language, &style)
            .await)
    }

    pub async fn handle_regenerate(
        &self,
        identity: &str,
        request: &RegenerateImageRequest,
    ) -> Result<RegenerateImageResponse, AdmissionError> {
        self.admit(identity)?;
        let style = self.style_from(request.font_style.as_ref());
        Ok(self
            .regenerate_image(
                &request.image_path,
                request.source_language,
                &request.target_languages,
                &style,
            )
            .await)
    }

    pub async fn handle_quote(
        &self,
        identity: &str,
        request: &QuoteImageRequest,
    ) -> Result<QuoteImageResponse, AdmissionError> {
        self.admit(identity)?;
        Ok(self
            .quote_image(
                &request.quote,
                request.source_language,
                request.target_language,
                &request.image_prompt,
            )
            .await)
    }

    pub fn handle_schedule(
        &self,
        identity: &str,
        request: &SchedulePostRequest,
    ) -> Result<SchedulePostResponse, AdmissionError> {
        self.admit(identity)?;
        Ok(self.schedule_posts(request))
    }

    // ===== Pipeline operations =====

    /// Run the full pipeline for one image. Never fails: request-level
    /// problems come back in `error`, per-language ones in `failures`.
    #[instrument(skip(self, target_languages, font_style), fields(path = %image_path, from = %source_language))]
    pub async fn process_image(
        &self,
        image_path: &str,
        source_language: Language,
        target_languages: &[Language],
        font_style: &FontStyle,
    ) -> ProcessImageResponse {
        let start = Instant::now();
        let Ok(_permit) = self.request_semaphore.acquire().await else {
            return ProcessImageResponse::failed(
                image_path,
                source_language,
                PipelineError::Uninitialized.to_string(),
            );
        };

        let mut fallbacks = Vec::new();
        let (content, regions) = self.extract(image_path, source_language, &mut fallbacks).await;

        let source = match self.load_source(image_path).await {
            Ok(image) => image,
            Err(e) => {
                error!("{}", e);
                return ProcessImageResponse {
                    image_id: content.image_id.clone(),
                    original_content: content,
                    translated_contents: Vec::new(),
                    failures: Vec::new(),
                    fallbacks,
                    error: Some(e.to_string()),
                };
            }
        };

        let cleaned = self.settle(
            self.phase3.execute(&source, &regions.confident_tokens).await,
            &mut fallbacks,
        );
        let job = Composite {
            style: font_style,
            placement: self.phase4.anchored_placement(&regions),
            prefix: "edited",
            localize_separators: false,
        };

        let languages = unique_languages(target_languages);
        let results = join_all(
            languages
                .iter()
                .map(|&target| self.run_language(&content, target, &cleaned, job)),
        )
        .await;
        let (translated_contents, failures) = self.collect(&languages, results, &mut fallbacks);

        self.metrics.record_image_processed();
        info!(
            "Image {} done in {:.2}s: {} languages ok, {} failed, {} fallbacks",
            content.image_id,
            start.elapsed().as_secs_f64(),
            translated_contents.len(),
            failures.len(),
            fallbacks.len()
        );

        ProcessImageResponse {
            image_id: content.image_id.clone(),
            original_content: content,
            translated_contents,
            failures,
            fallbacks,
            error: None,
        }
    }

    /// Re-run the whole sub-pipeline for one stored image and one language,
    /// overwriting the stored result for that pair
    #[instrument(skip(self, font_style), fields(to = %target_language))]
    pub async fn translate_image(
        &self,
        image_id: &str,
        target_language: Language,
        font_style: &FontStyle,
    ) -> PipelineResult<TranslatedContent> {
        let content = self
            .store
            .image(image_id)
            .ok_or_else(|| PipelineError::UnknownImage {
                image_id: image_id.to_string(),
            })?;

        let _permit = self
            .request_semaphore
            .acquire()
            .await
            .map_err(|_| PipelineError::Uninitialized)?;

        let mut fallbacks = Vec::new();
        let regions = self.settle(
            self.phase1
                .execute(Path::new(&content.source_path), content.source_language)
                .await,
            &mut fallbacks,
        );
        let source = self.load_source(&content.source_path).await?;
        let cleaned = self.settle(
            self.phase3.execute(&source, &regions.confident_tokens).await,
            &mut fallbacks,
        );
        let job = Composite {
            style: font_style,
            placement: self.phase4.anchored_placement(&regions),
            prefix: "edited",
            localize_separators: false,
        };

        let result = self.run_language(&content, target_language, &cleaned, job).await;
        self.metrics.record_language_outcome(result.is_ok());
        let (translated, reason) = result.inspect_err(|e| error!("{}", e))?;
        if let Some(reason) = reason {
            self.metrics.record_fallback(reason.label());
        }
        Ok(translated)
    }

    /// Background-regeneration variant: describe the background, ask for a
    /// fresh one and draw each translation centred in white
    #[instrument(skip(self, target_languages, font_style), fields(path = %image_path, from = %source_language))]
    pub async fn regenerate_image(
        &self,
        image_path: &str,
        source_language: Language,
        target_languages: &[Language],
        font_style: &FontStyle,
    ) -> RegenerateImageResponse {
        let start = Instant::now();
        let _permit = self.request_semaphore.acquire().await.ok();

        let mut fallbacks = Vec::new();
        let (content, _) = self.extract(image_path, source_language, &mut fallbacks).await;

        let source = match self.load_source(image_path).await {
            Ok(image) => image,
            Err(e) => {
                error!("{}", e);
                return RegenerateImageResponse {
                    image_id: content.image_id.clone(),
                    original_content: content,
                    background_description: String::new(),
                    translated_contents: Vec::new(),
                    failures: Vec::new(),
                    fallbacks,
                    error: Some(e.to_string()),
                };
            }
        };

        let description = self.settle(
            describe_background(&source, self.captioner.as_deref()).await,
            &mut fallbacks,
        );

        let background = match &self.generator {
            Some(generator) => Outcome::recover(
                generator.generate(&description).await,
                || source.clone(),
                |e| FallbackReason::GenerationFailed(e.to_string()),
            ),
            None => Outcome::fallback(source.clone(), FallbackReason::GenerationUnavailable),
        };
        if let Some(reason) = background.reason() {
            warn!("Background generation fell back to the source image: {}", reason);
        }
        let background = self.settle(background, &mut fallbacks);

        let style = FontStyle {
            family: font_style.family.clone(),
            size: self.centered_font_size,
            color: CENTERED_TEXT_COLOR.to_string(),
        };
        let job = Composite {
            style: &style,
            placement: Placement::Centered,
            prefix: "regenerated",
            localize_separators: true,
        };
        let languages = unique_languages(target_languages);
        let results = join_all(
            languages
                .iter()
                .map(|&target| self.run_language(&content, target, &background, job)),
        )
        .await;
        let (translated_contents, failures) = self.collect(&languages, results, &mut fallbacks);

        self.metrics.record_image_processed();
        info!(
            "Regenerated image {} in {:.2}s: {} languages ok, {} failed",
            content.image_id,
            start.elapsed().as_secs_f64(),
            translated_contents.len(),
            failures.len()
        );

        RegenerateImageResponse {
            image_id: content.image_id.clone(),
            original_content: content,
            background_description: description,
            translated_contents,
            failures,
            fallbacks,
            error: None,
        }
    }

    /// Translate a caller-supplied quote and draw it centred in white over an
    /// image generated from `image_prompt`. Without a generated image there is
    /// nothing to draw on, so that failure is reported in `error`.
    #[instrument(skip(self, quote, image_prompt), fields(to = %target_language))]
    pub async fn quote_image(
        &self,
        quote: &str,
        source_language: Language,
        target_language: Language,
        image_prompt: &str,
    ) -> QuoteImageResponse {
        let mut response = QuoteImageResponse {
            target_language,
            translated_text: String::new(),
            image_path: String::new(),
            fallbacks: Vec::new(),
            error: None,
        };
        if quote.trim().is_empty() {
            response.error = Some(PipelineError::EmptyQuote.to_string());
            return response;
        }
        let _permit = self.request_semaphore.acquire().await.ok();

        let translated = self.phase2.execute(quote, source_language, target_language).await;
        let translated = self.settle(translated, &mut response.fallbacks);
        response.translated_text = translated.clone();

        let background = match &self.generator {
            Some(generator) => generator
                .generate(image_prompt)
                .await
                .map_err(|e| PipelineError::GenerationFailed(e.to_string())),
            None => Err(PipelineError::GenerationFailed(
                FallbackReason::GenerationUnavailable.to_string(),
            )),
        };
        let background = match background {
            Ok(image) => image,
            Err(e) => {
                error!("{}", e);
                response.error = Some(e.to_string());
                return response;
            }
        };

        let style = FontStyle {
            family: self.default_style.family.clone(),
            size: self.centered_font_size,
            color: CENTERED_TEXT_COLOR.to_string(),
        };
        let text = text_to_draw(&translated, quote);
        match self
            .phase4
            .execute(&background, text, &style, Placement::Centered, "quote")
            .await
            .with_language_context(target_language)
        {
            Ok(path) => {
                info!("Quote in {} drawn to {}", target_language, path.display());
                response.image_path = path.display().to_string();
            }
            Err(e) => {
                error!("{}", e);
                response.error = Some(e.to_string());
            }
        }
        self.metrics.record_language_outcome(response.error.is_none());
        response
    }

    /// Plan posts and append them to the store. A malformed time yields an
    /// empty list with the error filled in.
    pub fn schedule_posts(&self, request: &SchedulePostRequest) -> SchedulePostResponse {
        match self.scheduler.schedule(
            &request.image_id,
            &request.platforms,
            &request.language_time_zones,
            &request.optimal_time,
        ) {
            Ok(schedules) => {
                self.store.append_schedules(&schedules);
                self.metrics.record_schedules_created(schedules.len());
                info!("Scheduled {} posts for image {}", schedules.len(), request.image_id);
                SchedulePostResponse {
                    schedules,
                    error: None,
                }
            }
            Err(e) => {
                warn!("Rejected schedule request for {}: {}", request.image_id, e);
                SchedulePostResponse {
                    schedules: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    // ===== Stored-result queries =====

    pub fn image(&self, image_id: &str) -> Option<ImageContent> {
        self.store.image(image_id)
    }

    pub fn translations(&self, image_id: &str) -> Vec<TranslatedContent> {
        self.store.translations_for(image_id)
    }

    pub fn schedules(&self, image_id: &str) -> Vec<PostSchedule> {
        self.store.schedules_for(image_id)
    }

    // ===== Internals =====

    /// OCR, then record the image under a fresh id
    async fn extract(
        &self,
        image_path: &str,
        source_language: Language,
        fallbacks: &mut Vec<FallbackReason>,
    ) -> (ImageContent, ExtractedRegions) {
        let regions = self.settle(
            self.phase1.execute(Path::new(image_path), source_language).await,
            fallbacks,
        );
        let content = ImageContent::new(image_path, source_language, regions.text.clone());
        self.store.put_image(content.clone());
        (content, regions)
    }

    async fn load_source(&self, image_path: &str) -> PipelineResult<DynamicImage> {
        load_image_async(image_path)
            .await
            .map_err(|e| PipelineError::ImageLoadFailed {
                path: image_path.to_string(),
                reason: format!("{:#}", e),
            })
    }

    /// Unwrap a stage outcome, keeping its fallback reason for the response
    fn settle<T>(&self, outcome: Outcome<T>, fallbacks: &mut Vec<FallbackReason>) -> T {
        if let Some(reason) = outcome.reason() {
            self.metrics.record_fallback(reason.label());
            fallbacks.push(reason.clone());
        }
        outcome.into_value()
    }

    /// translating -> compositing for one language; the error is scoped to it
    async fn run_language(
        &self,
        content: &ImageContent,
        target: Language,
        background: &DynamicImage,
        job: Composite<'_>,
    ) -> PipelineResult<(TranslatedContent, Option<FallbackReason>)> {
        let (text, source) = (&content.extracted_text, content.source_language);
        let translated = if job.localize_separators {
            self.phase2.execute_localized(text, source, target).await
        } else {
            self.phase2.execute(text, source, target).await
        };

        let text = text_to_draw(translated.value(), &content.extracted_text);
        let path = self
            .phase4
            .execute(background, text, job.style, job.placement, job.prefix)
            .await
            .with_language_context(target)?;

        let reason = translated.reason().cloned();
        let result = TranslatedContent {
            image_id: content.image_id.clone(),
            target_language: target,
            translated_text: translated.into_value(),
            edited_image_path: path.display().to_string(),
            created_at: chrono::Utc::now(),
        };
        self.store.put_translation(result.clone());
        Ok((result, reason))
    }

    fn collect(
        &self,
        languages: &[Language],
        results: Vec<PipelineResult<(TranslatedContent, Option<FallbackReason>)>>,
        fallbacks: &mut Vec<FallbackReason>,
    ) -> (Vec<TranslatedContent>, Vec<LanguageFailure>) {
        let mut translated_contents = Vec::with_capacity(results.len());
        let mut failures = Vec::new();

        for (&target, result) in languages.iter().zip(results) {
            self.metrics.record_language_outcome(result.is_ok());
            match result {
                Ok((content, reason)) => {
                    if let Some(reason) = reason {
                        self.metrics.record_fallback(reason.label());
                        fallbacks.push(reason);
                    }
                    translated_contents.push(content);
                }
                Err(e) => {
                    error!("{}", e);
                    failures.push(LanguageFailure {
                        target_language: target,
                        error: e.to_string(),
                    });
                }
            }
        }
        (translated_contents, failures)
    }
}

/// Target languages in request order, duplicates dropped
fn unique_languages(languages: &[Language]) -> Vec<Language> {
    let mut unique = Vec::with_capacity(languages.len());
    for language in languages {
        if !unique.contains(language) {
            unique.push(*language);
        }
    }
    unique
}
