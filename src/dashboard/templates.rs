use crate::job::{Job, JobState, QueueStats};

fn layout(title: &str, content: &str) -> String {
    let nav = JobState::ALL
        .iter()
        .map(|s| format!(r#"<a href="/admin/jobs/{s}">{}</a>"#, state_label(*s)))
        .collect::<Vec<_>>()
        .join("\n            ");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title} - Webhook Scheduler</title>
    <style>
        * {{ box-sizing: border-box; margin: 0; padding: 0; }}
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background: #f5f5f5; color: #333; line-height: 1.6; }}
        .container {{ max-width: 1200px; margin: 0 auto; padding: 20px; }}
        header {{ background: #2563eb; color: white; padding: 20px; margin-bottom: 20px; }}
        header h1 {{ font-size: 1.5rem; }}
        nav {{ background: white; padding: 10px 20px; margin-bottom: 20px; border-radius: 8px; box-shadow: 0 1px 3px rgba(0,0,0,0.1); }}
        nav a {{ color: #2563eb; text-decoration: none; margin-right: 20px; padding: 8px 16px; border-radius: 4px; }}
        nav a:hover {{ background: #eff6ff; }}
        .stats {{ display: grid; grid-template-columns: repeat(auto-fit, minmax(150px, 1fr)); gap: 20px; margin-bottom: 30px; }}
        .stat-card {{ background: white; padding: 20px; border-radius: 8px; box-shadow: 0 1px 3px rgba(0,0,0,0.1); text-align: center; }}
        .stat-card h3 {{ font-size: 2rem; color: #2563eb; }}
        .stat-card p {{ color: #666; text-transform: uppercase; font-size: 0.8rem; }}
        .card {{ background: white; border-radius: 8px; box-shadow: 0 1px 3px rgba(0,0,0,0.1); overflow: hidden; }}
        .card-header {{ background: #f8fafc; padding: 15px 20px; border-bottom: 1px solid #e5e7eb; font-weight: 600; }}
        table {{ width: 100%; border-collapse: collapse; }}
        th, td {{ padding: 12px 20px; text-align: left; border-bottom: 1px solid #e5e7eb; vertical-align: top; }}
        th {{ background: #f8fafc; font-weight: 600; color: #666; font-size: 0.85rem; text-transform: uppercase; }}
        tr:hover {{ background: #f8fafc; }}
        .badge {{ display: inline-block; padding: 4px 12px; border-radius: 20px; font-size: 0.75rem; font-weight: 600; }}
        .badge-delayed {{ background: #e0e7ff; color: #4f46e5; }}
        .badge-ready {{ background: #dbeafe; color: #1d4ed8; }}
        .badge-active {{ background: #fef3c7; color: #d97706; }}
        .badge-completed {{ background: #d1fae5; color: #059669; }}
        .badge-failed {{ background: #fee2e2; color: #dc2626; }}
        .error-text {{ color: #dc2626; font-size: 0.85rem; }}
        .mono {{ font-family: monospace; font-size: 0.85rem; }}
        pre {{ background: #f8fafc; padding: 12px; border-radius: 4px; overflow-x: auto; }}
        .empty-state {{ text-align: center; padding: 40px; color: #666; }}
    </style>
</head>
<body>
    <header><div class="container"><h1>Webhook Scheduler</h1></div></header>
    <div class="container">
        <nav>
            <a href="/admin">Overview</a>
            {nav}
        </nav>
        {content}
    </div>
</body>
</html>"#
    )
}

fn state_label(state: JobState) -> &'static str {
    match state {
        JobState::Delayed => "Delayed",
        JobState::Ready => "Ready",
        JobState::Active => "Active",
        JobState::Completed => "Completed",
        JobState::Failed => "Failed",
    }
}

fn badge(state: JobState) -> String {
    format!(r#"<span class="badge badge-{state}">{state}</span>"#)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn fmt_time(t: chrono::DateTime<chrono::Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn render_overview(stats: &QueueStats) -> String {
    let cards = JobState::ALL
        .iter()
        .map(|s| {
            format!(
                r#"<div class="stat-card"><h3>{}</h3><p>{}</p></div>"#,
                stats.get(*s),
                state_label(*s)
            )
        })
        .collect::<Vec<_>>()
        .join("\n            ");

    let content = format!(r#"<div class="stats">{cards}</div>"#);
    layout("Overview", &content)
}

pub fn render_jobs(state: JobState, jobs: &[Job]) -> String {
    let rows = if jobs.is_empty() {
        r#"<tr><td colspan="6" class="empty-state">No jobs found</td></tr>"#.to_string()
    } else {
        jobs.iter()
            .map(|job| {
                let error_display = match &job.last_error {
                    Some(error) => format!(r#"<br><span class="error-text">{}</span>"#, html_escape(error)),
                    None => String::new(),
                };
                format!(
                    r#"<tr><td class="mono"><a href="/admin/job/{}">{}</a></td><td>{}</td><td>{}{}</td><td>{}/{}</td><td>{}</td><td>{}</td></tr>"#,
                    html_escape(&job.id.0),
                    html_escape(&job.id.0[..8.min(job.id.0.len())]),
                    html_escape(&job.name),
                    badge(job.state),
                    error_display,
                    job.attempts,
                    job.max_attempts,
                    fmt_time(job.due_at),
                    fmt_time(job.updated_at),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let title = state_label(state);
    let content = format!(
        r#"<div class="card"><div class="card-header">{title} Jobs</div>
        <table><thead><tr><th>ID</th><th>Name</th><th>State</th><th>Attempts</th><th>Due</th><th>Updated</th></tr></thead>
        <tbody>{rows}</tbody></table></div>"#
    );
    layout(title, &content)
}

pub fn render_job(job: &Job) -> String {
    let payload = serde_json::to_string_pretty(&job.payload).unwrap_or_default();
    let optional = |v: Option<String>| v.map(|s| html_escape(&s)).unwrap_or_else(|| "-".to_string());

    let content = format!(
        r#"<div class="card"><div class="card-header">Job <span class="mono">{id}</span></div>
        <table>
            <tr><th>Name</th><td>{name}</td></tr>
            <tr><th>State</th><td>{state}</td></tr>
            <tr><th>Attempts</th><td>{attempts} / {max}</td></tr>
            <tr><th>Target URL</th><td class="mono">{target}</td></tr>
            <tr><th>Due</th><td>{due}</td></tr>
            <tr><th>Lease</th><td>{claimed_by} until {lease}</td></tr>
            <tr><th>Last error</th><td class="error-text">{error}</td></tr>
            <tr><th>Created</th><td>{created}</td></tr>
            <tr><th>Updated</th><td>{updated}</td></tr>
            <tr><th>Payload</th><td><pre>{payload}</pre></td></tr>
        </table></div>"#,
        id = html_escape(&job.id.0),
        name = html_escape(&job.name),
        state = badge(job.state),
        attempts = job.attempts,
        max = job.max_attempts,
        target = optional(job.target_url.clone().or_else(|| Some("(default)".to_string()))),
        due = fmt_time(job.due_at),
        claimed_by = optional(job.claimed_by.clone()),
        lease = optional(job.lease_expires_at.map(fmt_time)),
        error = optional(job.last_error.clone()),
        created = fmt_time(job.created_at),
        updated = fmt_time(job.updated_at),
        payload = html_escape(&payload),
    );
    layout("Job", &content)
}

pub fn render_not_found(id: &str) -> String {
    let content = format!(
        r#"<div class="card"><div class="empty-state">No job with id <span class="mono">{}</span></div></div>"#,
        html_escape(id)
    );
    layout("Not found", &content)
}
