//! Inline HTML templates for the login and consent pages

/// Username/password form. `error` is shown above the form after a failed attempt.
pub fn login_page(error: Option<&str>) -> String {
    let error_block = error
        .map(|e| format!(r#"<div class="status error">{}</div>"#, html_escape(e)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Login - Account Link</title>
    <style>{}</style>
</head>
<body>
    <div class="container">
        <h1>Login</h1>
        <p>Sign in to link your account.</p>
        {}
        <form method="post" action="/login">
            <div class="field">
                <label for="username">Username</label>
                <input type="text" id="username" name="username" required autocomplete="username">
            </div>
            <div class="field">
                <label for="password">Password</label>
                <input type="password" id="password" name="password" required autocomplete="current-password">
            </div>
            <button type="submit">Login</button>
        </form>
    </div>
</body>
</html>"#,
        CSS_STYLES, error_block
    )
}

/// Consent page. Submitting it resumes the pending authorization request.
pub fn consent_page(user_id: &str, client_id: Option<&str>) -> String {
    let client = client_id
        .map(|c| format!("<code>{}</code>", html_escape(c)))
        .unwrap_or_else(|| "the application".to_string());

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Authorize - Account Link</title>
    <style>{}</style>
</head>
<body>
    <div class="container">
        <h1>Authorize</h1>
        <p>Signed in as <code>{}</code>.</p>
        <p>Allow {} to access your account?</p>
        <form method="post" action="/oauth/authorize">
            <button type="submit">Allow</button>
        </form>
    </div>
</body>
</html>"#,
        CSS_STYLES,
        html_escape(user_id),
        client
    )
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

const CSS_STYLES: &str = r#"
* { box-sizing: border-box; }
body {
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
    background: #f4f5f7;
    color: #222;
    margin: 0;
    padding: 20px;
    min-height: 100vh;
    display: flex;
    align-items: center;
    justify-content: center;
}
.container {
    background: #fff;
    padding: 32px;
    border-radius: 8px;
    max-width: 380px;
    width: 100%;
    box-shadow: 0 2px 12px rgba(0,0,0,0.08);
}
h1 { margin: 0 0 8px 0; font-size: 22px; }
p { color: #555; margin: 0 0 16px 0; line-height: 1.5; }
.field { margin-bottom: 16px; }
label { display: block; margin-bottom: 6px; font-size: 14px; }
input {
    width: 100%;
    padding: 10px;
    border: 1px solid #ccc;
    border-radius: 4px;
    font-size: 16px;
}
button {
    width: 100%;
    padding: 12px;
    background: #2563eb;
    color: #fff;
    border: none;
    border-radius: 4px;
    font-size: 16px;
    cursor: pointer;
}
button:hover { background: #1d4ed8; }
.status { margin-bottom: 16px; padding: 10px; border-radius: 4px; font-size: 14px; }
.status.error { background: #fee2e2; color: #991b1b; }
code { background: #f1f1f1; padding: 2px 6px; border-radius: 4px; }
"#;
