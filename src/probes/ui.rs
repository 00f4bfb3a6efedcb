//! UI probes
//!
//! Fetch the page once per probe and check its links, forms, buttons and
//! images. Every inspected element becomes one `UiCheck`.

use reqwest::Url;
use tracing::{debug, info};

use super::html::{find_elements, Element};
use super::{HttpProbeExecutor, ProbeRequest};
use crate::http::{HttpError, HttpRequest};
use crate::models::{ProbeResult, ProbeType, UiCheck};

/// Load the page under test, or a failed result explaining why not
async fn load_page(
    executor: &HttpProbeExecutor,
    request: &ProbeRequest,
) -> Result<(Url, String), ProbeResult> {
    let fault = |msg: String| ProbeResult::fault(&request.task_id, request.probe_type, msg);

    let url = Url::parse(&request.endpoint.url)
        .map_err(|_| fault(format!("Invalid page URL: {}", request.endpoint.url)))?;

    match executor
        .dispatch(&request.budget, HttpRequest::get(url.as_str()))
        .await
    {
        Ok(resp) if resp.is_accepted() => Ok((url, resp.body)),
        Ok(resp) => Err(fault(format!("Failed to load page: HTTP {}", resp.status_code))),
        Err(HttpError::BudgetExhausted) => Err(fault("request budget exhausted".to_string())),
        Err(e) => Err(fault(format!("Failed to load page: {e}"))),
    }
}

/// HEAD a resource, returning the failure description if it is unreachable
async fn reachable(
    executor: &HttpProbeExecutor,
    request: &ProbeRequest,
    url: &str,
    want_image: bool,
) -> Result<Option<String>, HttpError> {
    match executor
        .dispatch(&request.budget, HttpRequest::new("HEAD", url))
        .await
    {
        Ok(resp) if !resp.is_accepted() => Ok(Some(format!("HTTP {}", resp.status_code))),
        Ok(resp) if want_image => {
            let is_image = resp
                .content_type()
                .map(|ct| ct.to_ascii_lowercase().starts_with("image/"))
                .unwrap_or(false);
            if is_image {
                Ok(None)
            } else {
                Ok(Some(format!(
                    "Not an image: {}",
                    resp.content_type().unwrap_or("unknown content type")
                )))
            }
        }
        Ok(_) => Ok(None),
        Err(HttpError::BudgetExhausted) => Err(HttpError::BudgetExhausted),
        Err(e) => Ok(Some(e.to_string())),
    }
}

pub(super) async fn check_links(executor: &HttpProbeExecutor, request: &ProbeRequest) -> ProbeResult {
    info!("Running Links probe: {}", request.endpoint.url);
    let (_, body) = match load_page(executor, request).await {
        Ok(page) => page,
        Err(result) => return result,
    };

    let mut checks = Vec::new();
    for link in find_elements(&body, &["a"]) {
        let Some(href) = link.attr("href") else {
            continue;
        };
        if !(href.starts_with("http://") || href.starts_with("https://")) {
            continue;
        }

        debug!("Checking link: {}", href);
        let check = UiCheck::new(href, "a", "navigate");
        match reachable(executor, request, href, false).await {
            Ok(None) => checks.push(check),
            Ok(Some(problem)) => checks.push(check.fail(format!("Broken link: {problem}"))),
            Err(_) => break,
        }
    }

    ProbeResult::from_ui_checks(&request.task_id, ProbeType::Links, checks)
}

/// Action a user would take on a form field
fn input_action(field: &Element) -> Option<&'static str> {
    if field.tag == "select" {
        return Some("select");
    }
    let kind = field.attr("type").unwrap_or("text").to_ascii_lowercase();
    match kind.as_str() {
        // Buttons are covered by the buttons probe
        "submit" | "button" | "reset" | "image" => None,
        "checkbox" | "radio" => Some("check"),
        "file" => Some("upload"),
        "range" => Some("slide"),
        "color" => Some("select-color"),
        _ => Some("type"),
    }
}

fn field_type(field: &Element) -> String {
    match field.tag.as_str() {
        "input" => field.attr("type").unwrap_or("text").to_ascii_lowercase(),
        other => other.to_string(),
    }
}

pub(super) async fn check_forms(executor: &HttpProbeExecutor, request: &ProbeRequest) -> ProbeResult {
    info!("Running Forms probe: {}", request.endpoint.url);
    let (_, body) = match load_page(executor, request).await {
        Ok(page) => page,
        Err(result) => return result,
    };

    let mut checks = Vec::new();
    for form in find_elements(&body, &["form"]) {
        for field in find_elements(&form.inner, &["input", "select", "textarea"]) {
            let Some(action) = input_action(&field) else {
                continue;
            };

            let mut check = UiCheck::new(field.label(), field_type(&field), action);
            if field.has_attr("disabled") {
                check = check.fail("Field is disabled");
            } else if field_type(&field) == "hidden" {
                check = check.fail("Field is not visible");
            } else if field.tag == "select" && find_elements(&field.inner, &["option"]).is_empty() {
                check = check.fail("Select has no options");
            }
            checks.push(check);
        }

        checks.push(UiCheck::new(form.label(), "form", "submit"));
    }

    ProbeResult::from_ui_checks(&request.task_id, ProbeType::Forms, checks)
}

pub(super) async fn check_buttons(
    executor: &HttpProbeExecutor,
    request: &ProbeRequest,
) -> ProbeResult {
    info!("Running Buttons probe: {}", request.endpoint.url);
    let (_, body) = match load_page(executor, request).await {
        Ok(page) => page,
        Err(result) => return result,
    };

    let mut checks = Vec::new();
    for element in find_elements(&body, &["button", "input"]) {
        let kind = element
            .attr("type")
            .map(|t| t.to_ascii_lowercase())
            .unwrap_or_else(|| {
                if element.tag == "button" {
                    "submit".to_string()
                } else {
                    "text".to_string()
                }
            });
        if element.tag == "input" && !matches!(kind.as_str(), "button" | "submit" | "reset") {
            continue;
        }

        let action = match kind.as_str() {
            "submit" => "submit",
            "reset" => "reset",
            _ => "click",
        };
        let check = UiCheck::new(element.label(), "button", action);
        if element.has_attr("disabled") {
            checks.push(check.fail("Button is disabled"));
        } else {
            checks.push(check);
        }
    }

    ProbeResult::from_ui_checks(&request.task_id, ProbeType::Buttons, checks)
}

pub(super) async fn check_images(executor: &HttpProbeExecutor, request: &ProbeRequest) -> ProbeResult {
    info!("Running Images probe: {}", request.endpoint.url);
    let (page_url, body) = match load_page(executor, request).await {
        Ok(page) => page,
        Err(result) => return result,
    };

    let mut checks = Vec::new();
    for image in find_elements(&body, &["img"]) {
        let src = image.attr("src").unwrap_or("").trim().to_string();
        let check = UiCheck::new(image.label(), "img", "load");

        if src.is_empty() {
            checks.push(check.fail("Image has no source"));
            continue;
        }
        if src.starts_with("data:image/") {
            checks.push(check);
            continue;
        }

        let resolved = match page_url.join(&src) {
            Ok(url) => url,
            Err(_) => {
                checks.push(check.fail(format!("Invalid image source: {src}")));
                continue;
            }
        };

        debug!("Checking image: {}", resolved);
        match reachable(executor, request, resolved.as_str(), true).await {
            Ok(None) => checks.push(check),
            Ok(Some(problem)) => checks.push(check.fail(format!("Image failed to load: {problem}"))),
            Err(_) => break,
        }
    }

    ProbeResult::from_ui_checks(&request.task_id, ProbeType::Images, checks)
}
