//! Python dialect of the script assembler.

use super::literal::{is_python_module_path, python_str, python_str_list};
use super::{check_body, check_markers, AssembledProgram, AssemblyError, ProgramAssembler, Slot};
use super::template::ProgramTemplate;
use crate::model::{
    DataLoading, DataProvider, ScreenerDefinition, ENTRY_FUNCTION, RESULT_END_MARKER,
    RESULT_START_MARKER,
};
use std::collections::BTreeSet;
use std::fmt::Write as FmtWrite;

const IMPORTS: &str = r"import json
import math
import os
import sys
import time
import traceback
import warnings
from datetime import datetime, timedelta, timezone

import numpy as np
import pandas as pd

warnings.filterwarnings('ignore')
";

const HELPERS: &str = r#"def _log(message):
    print(f"[screener] {message}", file=sys.stderr, flush=True)


def _chunks(items, size):
    for index in range(0, len(items), size):
        yield items[index:index + size]


class ProviderError(Exception):
    """The configured data provider cannot be used."""


def _to_frame(rows):
    if isinstance(rows, pd.DataFrame):
        frame = rows.copy()
    else:
        frame = pd.DataFrame(list(rows or []))
    if frame.empty:
        return frame
    frame.columns = [str(column).lower() for column in frame.columns]
    aliases = {"o": "open", "h": "high", "l": "low", "c": "close", "v": "volume", "t": "timestamp"}
    frame = frame.rename(columns={
        short: full for short, full in aliases.items()
        if short in frame.columns and full not in frame.columns
    })
    if "timestamp" in frame.columns:
        frame["timestamp"] = pd.to_datetime(frame["timestamp"], utc=True, errors="coerce")
        frame = frame.dropna(subset=["timestamp"]).set_index("timestamp").sort_index()
    for column in ("open", "high", "low", "close", "volume"):
        if column in frame.columns:
            frame[column] = pd.to_numeric(frame[column], errors="coerce")
    return frame


def load_market_data(symbols, lookback_days=LOOKBACK_DAYS):
    """Fetch daily bars in fixed-size batches, pausing between provider calls."""
    symbols = list(symbols)
    end = datetime.now(timezone.utc)
    start = end - timedelta(days=int(lookback_days * 1.5) + 5)
    batches = list(_chunks(symbols, max(1, BATCH_SIZE)))
    frames = {}
    for index, batch in enumerate(batches):
        try:
            raw = _fetch_batch(batch, start, end)
        except ProviderError:
            raise
        except Exception as exc:
            _log(f"batch {index + 1}/{len(batches)} failed: {exc}")
            raw = {}
        for symbol, rows in (raw or {}).items():
            frame = _to_frame(rows)
            if not frame.empty:
                frames[str(symbol).upper()] = frame.tail(lookback_days)
        if index + 1 < len(batches) and BATCH_DELAY_SECONDS > 0:
            time.sleep(BATCH_DELAY_SECONDS)
    _log(f"loaded {len(frames)} of {len(symbols)} symbols")
    return frames


def sma(series, window):
    return series.rolling(window=window, min_periods=window).mean()


def ema(series, span):
    return series.ewm(span=span, adjust=False).mean()


def rsi(series, period=14):
    delta = series.diff()
    gain = delta.clip(lower=0).ewm(alpha=1 / period, adjust=False).mean()
    loss = (-delta.clip(upper=0)).ewm(alpha=1 / period, adjust=False).mean()
    strength = gain / loss.replace(0, np.nan)
    return (100 - 100 / (1 + strength)).fillna(100.0)


def macd(series, fast=12, slow=26, signal=9):
    line = ema(series, fast) - ema(series, slow)
    signal_line = ema(line, signal)
    return line, signal_line, line - signal_line


def bollinger_bands(series, window=20, num_std=2.0):
    middle = sma(series, window)
    spread = series.rolling(window=window, min_periods=window).std()
    return middle + num_std * spread, middle, middle - num_std * spread


def atr(frame, period=14):
    previous_close = frame["close"].shift(1)
    true_range = pd.concat(
        [
            frame["high"] - frame["low"],
            (frame["high"] - previous_close).abs(),
            (frame["low"] - previous_close).abs(),
        ],
        axis=1,
    ).max(axis=1)
    return true_range.rolling(window=period, min_periods=period).mean()


def volume_ratio(frame, window=20):
    average = frame["volume"].rolling(window=window, min_periods=1).mean()
    return frame["volume"] / average.replace(0, np.nan)


def add_indicators(frame):
    if frame.empty or "close" not in frame.columns:
        return frame
    frame = frame.copy()
    close = frame["close"]
    frame["sma_20"] = sma(close, 20)
    frame["sma_50"] = sma(close, 50)
    frame["sma_200"] = sma(close, 200)
    frame["ema_12"] = ema(close, 12)
    frame["ema_26"] = ema(close, 26)
    frame["rsi_14"] = rsi(close, 14)
    frame["macd"], frame["macd_signal"], frame["macd_hist"] = macd(close)
    frame["bb_upper"], frame["bb_middle"], frame["bb_lower"] = bollinger_bands(close)
    if {"high", "low"}.issubset(frame.columns):
        frame["atr_14"] = atr(frame, 14)
    if "volume" in frame.columns:
        frame["volume_ratio"] = volume_ratio(frame)
    return frame


def prepare_data(raw):
    return {symbol: add_indicators(frame) for symbol, frame in raw.items()}


def _clean(value):
    if isinstance(value, dict):
        return {str(key): _clean(item) for key, item in value.items()}
    if isinstance(value, (list, tuple, set, frozenset)):
        return [_clean(item) for item in value]
    if hasattr(value, "tolist") and not isinstance(value, (str, bytes)):
        return _clean(value.tolist())
    if isinstance(value, float):
        return value if math.isfinite(value) else None
    return value


def _json_default(value):
    if hasattr(value, "isoformat"):
        return value.isoformat()
    return str(value)


def _normalize_result(result):
    if result is None:
        result = {}
    if isinstance(result, (list, tuple)):
        result = {"matches": list(result)}
    if not isinstance(result, dict):
        raise TypeError(f"entry function must return a dict or list, got {type(result).__name__}")
    payload = dict(result)
    payload["matches"] = [str(symbol) for symbol in (payload.get("matches") or [])]
    details = payload.get("details") or {}
    if not isinstance(details, dict):
        raise TypeError("details must be a dict keyed by symbol")
    payload["details"] = {str(symbol): info for symbol, info in details.items()}
    payload.setdefault("success", True)
    return _clean(payload)
"#;

/// Assembles Python programs.
#[derive(Clone, Debug)]
pub struct PythonAssembler {
    data: DataLoading,
}

impl PythonAssembler {
    /// Create an assembler that bakes `data` settings into generated helpers.
    pub fn new(data: DataLoading) -> Self {
        Self { data }
    }

    fn preamble(&self, definition: &ScreenerDefinition) -> Result<String, AssemblyError> {
        let config_json = serde_json::to_string(&definition.configuration).map_err(|err| {
            AssemblyError::InvalidValue {
                field: "configuration".to_string(),
                reason: err.to_string(),
            }
        })?;
        let universe = definition
            .universe()
            .unwrap_or_else(|| self.data.default_universe.clone());
        let provider = self.provider_for(definition);

        let mut out = String::from(IMPORTS);
        out.push('\n');
        let mut seen = BTreeSet::new();
        for known in DataProvider::known() {
            for (_, var) in known.credential_env() {
                if seen.insert(*var) {
                    // write! to String is infallible
                    let _ = writeln!(out, "{var} = os.environ.get({})", python_str(var));
                }
            }
        }
        out.push('\n');
        let _ = writeln!(out, "SCREENER_ID = {}", python_str(&definition.id));
        let _ = writeln!(out, "SCREENER_NAME = {}", python_str(&definition.name));
        let _ = writeln!(
            out,
            "SCREENER_CONFIG = json.loads({})",
            python_str(&config_json)
        );
        let _ = writeln!(out, "UNIVERSE = {}", python_str_list(&universe));
        let _ = writeln!(out, "DATA_PROVIDER = {}", python_str(provider.tag()));
        let _ = writeln!(out, "BATCH_SIZE = {}", self.data.batch_size.max(1));
        let _ = writeln!(
            out,
            "BATCH_DELAY_SECONDS = {} / 1000.0",
            self.data.batch_delay_ms
        );
        let _ = writeln!(out, "LOOKBACK_DAYS = {}", self.data.lookback_days.max(1));
        Ok(out)
    }

    fn provider_for(&self, definition: &ScreenerDefinition) -> DataProvider {
        definition
            .data_provider()
            .unwrap_or_else(|| self.data.default_provider.clone())
    }

    fn helpers(&self, definition: &ScreenerDefinition) -> Result<String, AssemblyError> {
        let mut out = String::from(HELPERS);
        out.push_str("\n\n");
        out.push_str(&self.fetch_batch(&self.provider_for(definition))?);
        Ok(out)
    }

    /// Provider-specific batch fetcher. Unknown providers get a fetcher that
    /// fails with the offending tag instead of silently loading nothing.
    fn fetch_batch(&self, provider: &DataProvider) -> Result<String, AssemblyError> {
        let mut out = String::from("def _fetch_batch(symbols, start, end):\n");
        if let DataProvider::Unknown(tag) = provider {
            let _ = writeln!(
                out,
                "    raise ProviderError(\"unknown data provider: \" + {})",
                python_str(tag)
            );
            return Ok(out);
        }

        let module = &self.data.provider_module;
        if !is_python_module_path(module) {
            return Err(AssemblyError::InvalidValue {
                field: "data.provider_module".to_string(),
                reason: format!("'{module}' is not a dotted Python module path"),
            });
        }
        let _ = writeln!(out, "    try:");
        let _ = writeln!(out, "        from {module} import get_provider");
        let _ = writeln!(out, "    except ImportError as exc:");
        let _ = writeln!(
            out,
            "        raise ProviderError(f\"provider module unavailable: {{exc}}\")"
        );
        let mut call = format!("get_provider({}", python_str(provider.tag()));
        for (kwarg, var) in provider.credential_env() {
            let _ = write!(call, ", {kwarg}={var}");
        }
        call.push(')');
        let _ = writeln!(out, "    provider = {call}");
        let _ = writeln!(
            out,
            "    return provider.get_bars(symbols, start=start, end=end, timeframe=\"1Day\")"
        );
        Ok(out)
    }

    fn harness() -> String {
        let mut out = String::new();
        out.push_str("def _emit(payload):\n");
        out.push_str("    text = json.dumps(payload, default=_json_default, allow_nan=False)\n");
        let _ = writeln!(
            out,
            "    sys.stdout.write(\"\\n\" + {} + \"\\n\" + text + \"\\n\" + {} + \"\\n\")",
            python_str(RESULT_START_MARKER),
            python_str(RESULT_END_MARKER)
        );
        out.push_str("    sys.stdout.flush()\n\n\n");
        out.push_str("def _main():\n");
        out.push_str("    data = prepare_data(load_market_data(UNIVERSE))\n");
        let _ = writeln!(out, "    payload = _normalize_result({ENTRY_FUNCTION}(data))");
        out.push_str("    payload.setdefault(\"symbols_screened\", len(data))\n");
        out.push_str("    _emit(payload)\n\n\n");
        out.push_str("if __name__ == \"__main__\":\n");
        out.push_str("    try:\n");
        out.push_str("        _main()\n");
        out.push_str("    except BaseException as exc:\n");
        out.push_str("        _emit({\n");
        out.push_str("            \"success\": False,\n");
        out.push_str("            \"error\": f\"{type(exc).__name__}: {exc}\",\n");
        out.push_str("            \"traceback\": traceback.format_exc(),\n");
        out.push_str("            \"matches\": [],\n");
        out.push_str("            \"details\": {},\n");
        out.push_str("        })\n");
        out.push_str("        sys.exit(1)\n");
        out
    }
}

impl Default for PythonAssembler {
    fn default() -> Self {
        Self::new(DataLoading::default())
    }
}

impl ProgramAssembler for PythonAssembler {
    fn assemble(&self, definition: &ScreenerDefinition) -> Result<AssembledProgram, AssemblyError> {
        let body = check_body(definition)?;
        let source = ProgramTemplate::new("#")
            .fill(Slot::Preamble, self.preamble(definition)?)?
            .fill(Slot::Helpers, self.helpers(definition)?)?
            .fill(Slot::Body, body)?
            .fill(Slot::Harness, Self::harness())?
            .render()?;
        check_markers(&definition.id, &source)?;
        Ok(AssembledProgram {
            source,
            extension: "py",
        })
    }
}
