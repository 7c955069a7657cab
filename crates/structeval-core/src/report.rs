use crate::aggregate::Summary;
use structeval_types::{AggregateBucket, BucketStatus};

/// Standalone HTML page with one bar pair (dspy vs fstring) per group.
pub fn generate_html_report(summary: &Summary) -> String {
    let mut rows = String::new();

    for (key, bucket) in summary.buckets() {
        let group = key.join(" / ");
        let row_class = row_class(bucket);
        let status = match bucket.status {
            BucketStatus::Ok if bucket.successful_runs == 0 => "no successes",
            BucketStatus::Ok => "ok",
            BucketStatus::NotApplicable => "n/a",
        };

        rows.push_str(&format!(
            r#"
            <tr class="{}">
                <td>{}</td>
                <td class="num">{}</td>
                <td class="num">{:.1}</td>
                <td class="bars">
                    {}
                    {}
                </td>
                <td class="num">{:.1}%</td>
                <td class="num">{:.3}</td>
                <td>{}</td>
            </tr>
            "#,
            row_class,
            html_escape(&group),
            bucket.runs,
            bucket.average_questions,
            bar("dspy", bucket.dspy_fraction()),
            bar("fstring", bucket.fstring_fraction()),
            bucket.average_success_rate * 100.0,
            bucket.average_task_performance,
            status
        ));
    }

    let zero = summary.zero_success_groups().len();
    let dimensions = summary
        .dimensions()
        .iter()
        .map(|d| d.name())
        .collect::<Vec<_>>()
        .join(" / ");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Structured Output Report</title>
    <style>
        * {{ box-sizing: border-box; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            margin: 0;
            padding: 20px;
            background: #f5f5f5;
        }}
        .container {{
            max-width: 1400px;
            margin: 0 auto;
            background: white;
            padding: 30px;
            border-radius: 8px;
            box-shadow: 0 2px 8px rgba(0,0,0,0.1);
        }}
        h1 {{ margin: 0 0 10px 0; color: #333; }}
        .summary {{
            display: flex;
            gap: 20px;
            margin: 20px 0 30px 0;
            padding: 20px;
            background: #f8f9fa;
            border-radius: 6px;
        }}
        .summary-item {{ flex: 1; }}
        .summary-label {{
            font-size: 12px;
            color: #666;
            text-transform: uppercase;
            letter-spacing: 0.5px;
            margin-bottom: 5px;
        }}
        .summary-value {{ font-size: 28px; font-weight: 600; color: #333; }}
        .summary-value.bad {{ color: #dc3545; }}
        table {{ width: 100%; border-collapse: collapse; margin-top: 20px; }}
        th {{
            background: #343a40;
            color: white;
            padding: 12px;
            text-align: left;
            font-size: 13px;
            text-transform: uppercase;
            letter-spacing: 0.5px;
        }}
        td {{ padding: 12px; border-bottom: 1px solid #dee2e6; vertical-align: middle; }}
        tr.pass {{ background: #f0f9f4; }}
        tr.fail {{ background: #fef3f2; }}
        tr.na {{ background: #f8f9fa; color: #6c757d; }}
        .num {{ font-variant-numeric: tabular-nums; }}
        .bars {{ width: 40%; }}
        .bar {{ display: flex; align-items: center; gap: 8px; margin: 2px 0; font-size: 12px; }}
        .bar-label {{ width: 60px; color: #495057; }}
        .bar-track {{ flex: 1; background: #e9ecef; border-radius: 3px; height: 14px; }}
        .bar-fill {{ height: 14px; border-radius: 3px; }}
        .bar-fill.dspy {{ background: #007bff; }}
        .bar-fill.fstring {{ background: #fd7e14; }}
        .timestamp {{ color: #6c757d; font-size: 14px; margin-bottom: 20px; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Structured Output Report</h1>
        <div class="timestamp">Generated: {}</div>

        <div class="summary">
            <div class="summary-item">
                <div class="summary-label">Groups ({})</div>
                <div class="summary-value">{}</div>
            </div>
            <div class="summary-item">
                <div class="summary-label">Runs</div>
                <div class="summary-value">{}</div>
            </div>
            <div class="summary-item">
                <div class="summary-label">Groups without a success</div>
                <div class="summary-value{}">{}</div>
            </div>
        </div>

        <table>
            <thead>
                <tr>
                    <th>Group</th>
                    <th>Runs</th>
                    <th>Avg Questions</th>
                    <th>Valid responses</th>
                    <th>Success Rate</th>
                    <th>Task Performance</th>
                    <th>Status</th>
                </tr>
            </thead>
            <tbody>
                {}
            </tbody>
        </table>
    </div>
</body>
</html>"#,
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        html_escape(&dimensions),
        summary.len(),
        summary.buckets().map(|(_, b)| b.runs).sum::<u64>(),
        if zero > 0 { " bad" } else { "" },
        zero,
        rows
    )
}

fn row_class(bucket: &AggregateBucket) -> &'static str {
    match bucket.status {
        BucketStatus::NotApplicable => "na",
        BucketStatus::Ok if bucket.successful_runs == 0 => "fail",
        BucketStatus::Ok => "pass",
    }
}

fn bar(method: &str, fraction: f64) -> String {
    let pct = (fraction * 100.0).clamp(0.0, 100.0);
    format!(
        r#"<div class="bar"><span class="bar-label">{method}</span><div class="bar-track"><div class="bar-fill {method}" style="width: {pct:.1}%"></div></div><span>{pct:.1}%</span></div>"#
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
