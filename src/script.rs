//! Custom test script files: accepted extensions and starter templates.

use std::path::Path;
use thiserror::Error;

pub const ACCEPTED_EXTENSIONS: [&str; 2] = ["js", "ts"];
pub const DEFAULT_FILE_NAME: &str = "custom-test.js";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("'{0}' is not a JavaScript or TypeScript file (expected .js or .ts)")]
    Extension(String),

    #[error("unknown template '{0}' (expected one of: default, login, form, navigation)")]
    UnknownTemplate(String),

    #[error("failed to access script {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Check a script file name against the accepted extensions.
pub fn check_file_name(name: &str) -> Result<(), ScriptError> {
    let ok = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| ACCEPTED_EXTENSIONS.contains(&e));
    if ok {
        Ok(())
    } else {
        Err(ScriptError::Extension(name.to_string()))
    }
}

/// Read a script after validating its name.
pub fn load(path: &Path) -> Result<String, ScriptError> {
    check_file_name(&path.to_string_lossy())?;
    std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Write a script after validating its name.
pub fn save(path: &Path, contents: &str) -> Result<(), ScriptError> {
    check_file_name(&path.to_string_lossy())?;
    std::fs::write(path, contents).map_err(|source| ScriptError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub const TEMPLATE_NAMES: [&str; 4] = ["default", "login", "form", "navigation"];

pub fn template(name: &str) -> Result<&'static str, ScriptError> {
    match name {
        "default" => Ok(DEFAULT_TEMPLATE),
        "login" => Ok(LOGIN_TEMPLATE),
        "form" => Ok(FORM_TEMPLATE),
        "navigation" => Ok(NAVIGATION_TEMPLATE),
        other => Err(ScriptError::UnknownTemplate(other.to_string())),
    }
}

const DEFAULT_TEMPLATE: &str = r##"// TestPilot - Custom Test Script

const testScript = {
  name: "Custom Test",
  description: "Your custom test implementation",

  config: {
    timeout: 5000,
    retries: 3,
    screenshot: true
  },

  async execute(page) {
    try {
      await page.goto("https://example.com");
      const title = await page.title();
      console.log("Page title:", title);
      return { status: "pass", message: "Test passed" };
    } catch (error) {
      return { status: "fail", message: error.message };
    }
  }
};

export default testScript;
"##;

const LOGIN_TEMPLATE: &str = r##"// Login Flow Test Template
const loginTest = {
  name: "Login Test",
  description: "Test user authentication flow",

  async execute(page) {
    await page.goto("https://your-site.com/login");
    await page.fill("#email", "test@example.com");
    await page.fill("#password", "password123");
    await page.click("#login-button");
    await page.waitForSelector(".dashboard");
    return { status: "pass", message: "Login successful" };
  }
};
"##;

const FORM_TEMPLATE: &str = r##"// Form Submission Test Template
const formTest = {
  name: "Form Test",
  description: "Test form submission and validation",

  async execute(page) {
    await page.goto("https://your-site.com/contact");
    await page.fill("#name", "John Doe");
    await page.fill("#email", "john@example.com");
    await page.fill("#message", "Test message");
    await page.click("#submit");
    await page.waitForSelector(".success-message");
    return { status: "pass", message: "Form submitted successfully" };
  }
};
"##;

const NAVIGATION_TEMPLATE: &str = r##"// Navigation Test Template
const navigationTest = {
  name: "Navigation Test",
  description: "Test website navigation and menu functionality",

  async execute(page) {
    await page.goto("https://your-site.com");
    await page.click("#about-link");
    await page.waitForURL("**/about");
    await page.click("#services-link");
    await page.waitForURL("**/services");
    await page.click("#contact-link");
    await page.waitForURL("**/contact");
    return { status: "pass", message: "Navigation working correctly" };
  }
};
"##;
