use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tower_http::cors::CorsLayer;

use crate::{
    config::Settings,
    controller::BootstrapController,
    events::SessionEvent,
    gateway::ConnectionMode,
    session::SessionStore,
    utils::now_ts,
};

#[derive(Clone)]
pub struct DashboardState {
    pub settings: Settings,
    pub store: SessionStore,
    pub controller: BootstrapController,
    pub events: mpsc::Sender<SessionEvent>,
    pub mode: ConnectionMode,
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/session", get(api_session))
        .route("/api/health", get(api_health))
        .route("/api/bootstrap", post(api_bootstrap))
        .route("/api/login", post(api_login))
        .route("/api/disconnect", post(api_disconnect))
        .route("/api/events/accounts", post(api_accounts_changed))
        .route("/api/events/network", post(api_network_changed))
        .route("/api/rebalance", post(api_rebalance))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve_dashboard(state: DashboardState) -> Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        state.settings.dashboard_host, state.settings.dashboard_port
    )
    .parse()
    .context("dashboard addr parse")?;

    let app = router(state);
    log::info!("dashboard.start url=http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index(State(st): State<DashboardState>) -> impl IntoResponse {
    Html(render_index_html(
        &st.settings.dashboard_host,
        st.settings.dashboard_port,
        st.mode.as_str(),
        &st.settings.token_address.to_string(),
    ))
}

fn render_index_html(host: &str, port: u16, mode: &str, token: &str) -> String {
    format!(
        r#"<!doctype html>
 <html lang="en">
   <head>
     <meta charset="utf-8" />
     <meta name="viewport" content="width=device-width, initial-scale=1" />
     <title>pooldash • Session</title>
     <style>
       :root {{
         --bg: #0b1220;
         --panel: rgba(255,255,255,0.06);
         --stroke: rgba(255,255,255,0.12);
         --text: rgba(255,255,255,0.92);
         --muted: rgba(255,255,255,0.65);
         --good: #33d17a;
         --bad: #ff4d4d;
         --brand: #7c5cff;
         --brand2: #3dd6d0;
       }}
       * {{ box-sizing: border-box; }}
       body {{
         margin: 0;
         font-family: ui-sans-serif, system-ui, -apple-system, Segoe UI, Roboto, Helvetica, Arial;
         color: var(--text);
         background: radial-gradient(1200px 900px at 15% 10%, rgba(124,92,255,0.20), transparent 60%),
                     radial-gradient(1100px 800px at 90% 20%, rgba(61,214,208,0.16), transparent 55%),
                     var(--bg);
       }}
       .wrap {{ max-width: 1100px; margin: 0 auto; padding: 22px 18px 42px; }}
       .topbar {{
         display: flex; align-items: center; justify-content: space-between; gap: 12px;
         padding: 16px 16px; border: 1px solid var(--stroke); border-radius: 16px;
         background: linear-gradient(180deg, rgba(255,255,255,0.06), rgba(255,255,255,0.03));
       }}
       .brand {{ display: flex; align-items: center; gap: 12px; }}
       .logo {{
         width: 42px; height: 42px; border-radius: 12px;
         background: conic-gradient(from 180deg, var(--brand), var(--brand2), var(--brand));
       }}
       .title {{ font-weight: 800; }}
       .subtitle {{ color: var(--muted); font-size: 12px; margin-top: 2px; }}
       .chips {{ display: flex; flex-wrap: wrap; gap: 8px; justify-content: flex-end; }}
       .chip {{
         padding: 7px 10px; border-radius: 999px; border: 1px solid var(--stroke);
         background: rgba(255,255,255,0.04); font-size: 12px; color: var(--muted);
       }}
       .chip b {{ color: var(--text); }}
       .grid {{ display: grid; gap: 14px; margin-top: 14px; grid-template-columns: repeat(12, 1fr); }}
       .card {{ border: 1px solid var(--stroke); border-radius: 16px; background: var(--panel); overflow: hidden; }}
       .card .hd {{
         display:flex; align-items: center; justify-content: space-between;
         padding: 12px 14px; border-bottom: 1px solid rgba(255,255,255,0.08);
       }}
       .card .hd .h {{ font-weight: 800; }}
       .card .bd {{ padding: 12px 14px; }}
       .kpis {{ display: grid; gap: 10px; grid-template-columns: repeat(4, 1fr); }}
       .kpi {{ border: 1px solid rgba(255,255,255,0.10); border-radius: 14px; padding: 12px; }}
       .kpi .lbl {{ color: var(--muted); font-size: 12px; }}
       .kpi .val {{ font-size: 22px; font-weight: 850; margin-top: 6px; }}
       .good {{ color: var(--good); }}
       .bad {{ color: var(--bad); }}
       table {{ width: 100%; border-collapse: collapse; }}
       th, td {{ padding: 8px 10px; border-bottom: 1px solid rgba(255,255,255,0.07); text-align: left; }}
       th {{ color: var(--muted); font-size: 12px; }}
       td {{ font-size: 13px; }}
       .mono {{ font-family: ui-monospace, SFMono-Regular, Menlo, Consolas, monospace; }}
       .btn {{
         cursor: pointer; padding: 8px 10px; border-radius: 10px;
         border: 1px solid rgba(255,255,255,0.12); background: rgba(255,255,255,0.05);
         color: var(--text); font-weight: 700; font-size: 12px;
       }}
       .btn:hover {{ background: rgba(255,255,255,0.08); }}
       .col-12 {{ grid-column: span 12; }}
       .col-6 {{ grid-column: span 6; }}
       @media (max-width: 900px) {{
         .kpis {{ grid-template-columns: repeat(2, 1fr); }}
         .col-6 {{ grid-column: span 12; }}
       }}
     </style>
   </head>
   <body>
     <div class="wrap">
       <div class="topbar">
         <div class="brand">
           <div class="logo"></div>
           <div>
             <div class="title">pooldash • Session</div>
             <div class="subtitle">
               Local: <span class="mono">{host}:{port}</span> • wallet=<b>{mode}</b> • token <span class="mono">{token}</span>
             </div>
           </div>
         </div>
         <div class="chips">
           <div class="chip">Status: <b id="statusText">starting…</b></div>
           <button class="btn" data-post="/api/bootstrap">Bootstrap</button>
           <button class="btn" data-post="/api/login">Login</button>
           <button class="btn" data-post="/api/disconnect">Disconnect</button>
           <button class="btn" data-post="/api/rebalance">Rebalance</button>
         </div>
       </div>

       <div class="grid">
         <div class="card col-12">
           <div class="hd"><div class="h">Account</div><div class="chip mono" id="addr">--</div></div>
           <div class="bd">
             <div class="kpis">
               <div class="kpi"><div class="lbl">Name</div><div class="val" id="name">--</div></div>
               <div class="kpi"><div class="lbl">ETH balance</div><div class="val" id="balance">--</div></div>
               <div class="kpi"><div class="lbl">Network</div><div class="val" id="network">--</div></div>
               <div class="kpi"><div class="lbl">Next rebalance</div><div class="val" id="nextReb">--</div></div>
             </div>
           </div>
         </div>

         <div class="card col-6">
           <div class="hd"><div class="h">Pool</div></div>
           <div class="bd"><table><tbody id="poolRows"></tbody></table></div>
         </div>

         <div class="card col-6">
           <div class="hd"><div class="h">Protocol</div></div>
           <div class="bd"><table><tbody id="paramRows"></tbody></table></div>
         </div>

         <div class="card col-6">
           <div class="hd"><div class="h">Token balances</div></div>
           <div class="bd"><table><tbody id="tokenRows"></tbody></table></div>
         </div>

         <div class="card col-6">
           <div class="hd"><div class="h">Exchange rates</div></div>
           <div class="bd"><table><tbody id="rateRows"></tbody></table></div>
         </div>
       </div>
     </div>

     <script>
       const $ = (id) => document.getElementById(id);
       const rows = (obj) => Object.entries(obj || {{}})
         .map(([k, v]) => `<tr><td class="mono">${{k}}</td><td>${{v}}</td></tr>`).join("");

       async function refresh() {{
         try {{
           const s = await (await fetch("/api/session")).json();
           $("statusText").textContent = s.loading ? "loading…" : "idle";
           $("statusText").className = s.loading ? "" : "good";
           $("addr").textContent = s.address || "not connected";
           $("name").textContent = s.name || "--";
           $("balance").textContent = s.balance.toFixed(4);
           $("network").textContent = `${{s.network.name}} (${{s.network.chain_id}})`;
           $("nextReb").textContent = s.next_rebalance_at ? new Date(s.next_rebalance_at).toLocaleString() : "--";
           $("poolRows").innerHTML = rows({{
             price: s.pool.price, reserve_a: s.pool.reserve_a, reserve_b: s.pool.reserve_b,
             protocol_token_balance: s.protocol_token_balance,
           }});
           $("paramRows").innerHTML = rows(s.protocol_params);
           $("tokenRows").innerHTML = rows(s.token_balances);
           $("rateRows").innerHTML = rows(s.exchange_rates);
         }} catch (e) {{
           $("statusText").textContent = "offline";
           $("statusText").className = "bad";
         }}
       }}

       document.querySelectorAll("[data-post]").forEach((b) => {{
         b.addEventListener("click", async () => {{
           const r = await fetch(b.dataset.post, {{ method: "POST" }});
           if (!r.ok) $("statusText").textContent = `error ${{r.status}}`;
           refresh();
         }});
       }});

       refresh();
       setInterval(refresh, 2000);
     </script>
   </body>
 </html>
"#,
        host = host,
        port = port,
        mode = mode,
        token = token,
    )
}

async fn api_session(State(st): State<DashboardState>) -> impl IntoResponse {
    Json(st.store.snapshot())
}

async fn api_health(State(st): State<DashboardState>) -> Json<serde_json::Value> {
    let s = st.store.snapshot();
    Json(serde_json::json!({
        "ts": now_ts(),
        "wallet_mode": st.mode.as_str(),
        "pool_price_convention": st.settings.pool_price_convention,
        "loading": s.loading,
        "generation": st.store.generation(),
        "connected": s.address.is_some(),
    }))
}

fn enqueue(st: &DashboardState, event: SessionEvent) -> Response {
    let kind = event.kind();
    match st.events.try_send(event) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"ok": true, "event": kind})),
        )
            .into_response(),
        Err(TrySendError::Full(_)) => {
            log::warn!("dashboard.event.dropped kind={} reason=channel_full", kind);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"ok": false, "error": "event_queue_full"})),
            )
                .into_response()
        }
        Err(TrySendError::Closed(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ok": false, "error": "dispatcher_stopped"})),
        )
            .into_response(),
    }
}

async fn api_bootstrap(State(st): State<DashboardState>) -> Response {
    enqueue(&st, SessionEvent::Bootstrap)
}

async fn api_login(State(st): State<DashboardState>) -> Response {
    if st.mode != ConnectionMode::Injected {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"ok": false, "error": "wallet_required"})),
        )
            .into_response();
    }
    enqueue(&st, SessionEvent::Login)
}

async fn api_disconnect(State(st): State<DashboardState>) -> Response {
    enqueue(&st, SessionEvent::Disconnected)
}

#[derive(Deserialize)]
struct AccountsBody {
    accounts: Vec<String>,
}

async fn api_accounts_changed(
    State(st): State<DashboardState>,
    Json(body): Json<AccountsBody>,
) -> Response {
    enqueue(&st, SessionEvent::AccountsChanged(body.accounts))
}

#[derive(Deserialize)]
struct NetworkBody {
    chain_id: String,
}

async fn api_network_changed(
    State(st): State<DashboardState>,
    Json(body): Json<NetworkBody>,
) -> Response {
    enqueue(&st, SessionEvent::NetworkChanged(body.chain_id))
}

async fn api_rebalance(State(st): State<DashboardState>) -> Response {
    match st.controller.rebalance().await {
        Ok(r) => Json(serde_json::json!({
            "ok": true,
            "tx": r.transaction_hash.to_string(),
            "block": r.block_number,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({"ok": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}
